//! In-memory adapter for hardware-free runs
//!
//! [`MockChannel`] behaves like an ELM327 on the wire: it collects written bytes
//! until a carriage return, then queues the scripted reply (echo, content,
//! blank lines, prompt) to be read back one byte at a time. Commands without a
//! script are answered with `OK`.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::stream::CommunicationChannel;

#[derive(Debug, Clone)]
enum Script {
    Reply { text: String, stalls: Vec<usize> },
    Silent,
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
enum ReadEvent {
    Byte(u8),
    Empty,
}

#[derive(Debug, Default)]
struct MockLog {
    written: Vec<u8>,
    sent: Vec<String>,
    empty_reads: usize,
}

/// Shared view of what a [`MockChannel`] has seen, usable after the channel
/// has been moved into a connection
#[derive(Debug, Clone)]
pub struct MockHandle(Arc<Mutex<MockLog>>);

impl MockHandle {
    fn log(&self) -> MutexGuard<'_, MockLog> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every byte written to the adapter
    pub fn written(&self) -> Vec<u8> {
        self.log().written.clone()
    }

    /// Commands received, in order, without terminators
    pub fn sent(&self) -> Vec<String> {
        self.log().sent.clone()
    }

    /// How many times `command` was received
    pub fn count(&self, command: &str) -> usize {
        self.log().sent.iter().filter(|c| *c == command).count()
    }

    /// Reads that returned no data
    pub fn empty_reads(&self) -> usize {
        self.log().empty_reads
    }
}

/// Scripted ELM327 stand-in implementing [`CommunicationChannel`]
pub struct MockChannel {
    scripts: HashMap<String, VecDeque<Script>>,
    echo: bool,
    timeout_errors: bool,
    line: Vec<u8>,
    pending: VecDeque<ReadEvent>,
    interrupts: HashMap<String, Arc<AtomicBool>>,
    log: Arc<Mutex<MockLog>>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Echoing adapter answering `OK` to everything
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            echo: true,
            timeout_errors: false,
            line: Vec::new(),
            pending: VecDeque::new(),
            interrupts: HashMap::new(),
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    /// Mock of a genuine adapter that completes the full init sequence
    pub fn elm327() -> Self {
        Self::new()
            .respond("ATRV", "12.6V")
            .respond("ATZ", "ELM327 v1.5")
    }

    /// Handle for inspecting traffic later
    pub fn handle(&self) -> MockHandle {
        MockHandle(Arc::clone(&self.log))
    }

    /// Queue a reply for `command`. Replies are consumed in order; the last
    /// one keeps being repeated.
    pub fn respond(self, command: &str, reply: &str) -> Self {
        self.respond_with_stalls(command, reply, &[])
    }

    /// Like [`respond`](Self::respond), with `stalls[i]` empty reads before byte `i`
    pub fn respond_with_stalls(self, command: &str, reply: &str, stalls: &[usize]) -> Self {
        self.script(
            command,
            Script::Reply {
                text: reply.to_string(),
                stalls: stalls.to_vec(),
            },
        )
    }

    /// Queue exact reply bytes for `command`, bypassing echo and framing
    pub fn respond_raw(self, command: &str, raw: &[u8]) -> Self {
        self.script(command, Script::Raw(raw.to_vec()))
    }

    /// Never answer `command`, dropping any reply scripted for it earlier
    pub fn silent(mut self, command: &str) -> Self {
        self.scripts.remove(command);
        self.script(command, Script::Silent)
    }

    /// Raise `flag` as soon as `command` is received, like a Ctrl-C arriving
    /// while the adapter works on it
    pub fn raise_on(mut self, command: &str, flag: Arc<AtomicBool>) -> Self {
        self.interrupts.insert(command.to_string(), flag);
        self
    }

    /// Do not echo commands back
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Report empty reads as `TimedOut` errors, as serial ports do
    pub fn with_timeout_errors(mut self) -> Self {
        self.timeout_errors = true;
        self
    }

    fn script(mut self, command: &str, script: Script) -> Self {
        self.scripts
            .entry(command.to_string())
            .or_default()
            .push_back(script);
        self
    }

    fn next_script(&mut self, command: &str) -> Script {
        match self.scripts.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Script::Silent),
            Some(queue) => queue.front().cloned().unwrap_or(Script::Silent),
            None => Script::Reply {
                text: "OK".to_string(),
                stalls: Vec::new(),
            },
        }
    }

    fn accept_command(&mut self, command: String) {
        if let Some(flag) = self.interrupts.get(&command) {
            flag.store(true, Ordering::SeqCst);
        }
        let script = self.next_script(&command);
        match script {
            Script::Silent => {}
            Script::Raw(bytes) => self.pending.extend(bytes.into_iter().map(ReadEvent::Byte)),
            Script::Reply { text, stalls } => {
                let mut bytes = Vec::new();
                if self.echo {
                    bytes.extend_from_slice(command.as_bytes());
                    bytes.push(b'\r');
                }
                bytes.extend_from_slice(text.as_bytes());
                bytes.extend_from_slice(b"\r\r>");
                for (i, byte) in bytes.into_iter().enumerate() {
                    let empties = stalls.get(i).copied().unwrap_or(0);
                    self.pending
                        .extend(std::iter::repeat(ReadEvent::Empty).take(empties));
                    self.pending.push_back(ReadEvent::Byte(byte));
                }
            }
        }
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .push(command);
    }
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.pending.pop_front() {
            Some(ReadEvent::Byte(byte)) => {
                buf[0] = byte;
                Ok(1)
            }
            Some(ReadEvent::Empty) | None => {
                self.log.lock().unwrap_or_else(|e| e.into_inner()).empty_reads += 1;
                if self.timeout_errors {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
                } else {
                    Ok(0)
                }
            }
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .written
            .extend_from_slice(buf);
        for &byte in buf {
            if byte == b'\r' {
                let command = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                self.accept_command(command);
            } else {
                self.line.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MockChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mock: &mut MockChannel) -> Vec<u8> {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while let Ok(1) = mock.read(&mut byte) {
            out.push(byte[0]);
        }
        out
    }

    #[test]
    fn test_default_reply_is_ok_with_echo() {
        let mut mock = MockChannel::new();
        mock.write_all(b"ATE1\r").unwrap();
        assert_eq!(read_all(&mut mock), b"ATE1\rOK\r\r>".to_vec());
    }

    #[test]
    fn test_replies_are_consumed_in_order_and_last_repeats() {
        let mut mock = MockChannel::new()
            .without_echo()
            .respond("B90300", "first")
            .respond("B90300", "second");
        for expected in ["first", "second", "second"] {
            mock.write_all(b"B90300\r").unwrap();
            assert_eq!(read_all(&mut mock), format!("{expected}\r\r>").into_bytes());
        }
        assert_eq!(mock.handle().count("B90300"), 3);
    }

    #[test]
    fn test_silent_command_yields_empty_reads() {
        let mut mock = MockChannel::new().silent("ATZ").with_timeout_errors();
        mock.write_all(b"ATZ\r").unwrap();
        let mut byte = [0u8; 1];
        let err = mock.read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(mock.handle().empty_reads(), 1);
    }
}
