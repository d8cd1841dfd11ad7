//! AT command framing
//!
//! Half-duplex request/response over the adapter's byte stream: a command goes
//! out terminated by a carriage return, and the reply is read byte by byte
//! until the `>` prompt.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::{stream::CommunicationChannel, Command, ConnectionConfig, ProtocolError};
use crate::capture::{Capture, Direction};

/// Byte the adapter sends once it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Command terminator
pub const TERMINATOR: u8 = b'\r';

/// Consecutive empty reads after which the link is considered unusable
pub const MAX_ZERO_READS: u32 = 3;

const LINE_TERMINATORS: [char; 2] = ['\r', '\n'];

/// Adapter reply with echo, line terminators and prompt removed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedReply(String);

impl ParsedReply {
    /// Reply text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the reply text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::ops::Deref for ParsedReply {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParsedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a raw reply down to its content.
///
/// The echoed command is removed only as an exact prefix: payload bytes such
/// as "51" or "13" share characters with the command text and must survive.
pub fn parse_reply(command: &str, raw: &[u8]) -> ParsedReply {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start_matches(LINE_TERMINATORS);
    let text = text.strip_prefix(command).unwrap_or(text);
    let text = text.trim_start_matches(LINE_TERMINATORS);
    let text =
        text.trim_end_matches(|c: char| c == PROMPT as char || LINE_TERMINATORS.contains(&c));
    ParsedReply(text.to_string())
}

/// Owns the channel to the adapter and performs one exchange at a time
pub struct Framer {
    channel: Option<Box<dyn CommunicationChannel>>,
    read_timeout: Duration,
    echo_exchanges: bool,
    capture: Option<Capture>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Framer {
    /// Take ownership of an open channel and apply the per-read timeout
    pub fn new(
        mut channel: Box<dyn CommunicationChannel>,
        config: &ConnectionConfig,
    ) -> Result<Self, ProtocolError> {
        channel.set_timeout(config.read_timeout)?;
        debug!(
            channel = %channel.describe(),
            timeout_ms = config.read_timeout.as_millis() as u64,
            "channel attached"
        );
        Ok(Self {
            channel: Some(channel),
            read_timeout: config.read_timeout,
            echo_exchanges: config.debug,
            capture: config.dump.then(Capture::new),
            interrupt: None,
        })
    }

    /// Abort any exchange once `flag` is raised
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// Traffic recorded so far, if capturing is enabled
    pub fn capture(&self) -> Option<&Capture> {
        self.capture.as_ref()
    }

    /// Whether the channel is still held
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Release the channel; later exchanges fail with `NotConnected`
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            debug!("channel released");
        }
    }

    /// Drop unread bytes left over from an earlier exchange
    pub fn clear_input(&mut self) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        channel.clear_input_buffer()?;
        Ok(())
    }

    /// Send a command and return its cleaned reply
    pub fn exchange(&mut self, command: Command) -> Result<ParsedReply, ProtocolError> {
        self.exchange_text(command.text())
    }

    /// Send arbitrary command text and return its cleaned reply
    pub fn exchange_text(&mut self, command: &str) -> Result<ParsedReply, ProtocolError> {
        self.check_interrupt()?;
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;

        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(TERMINATOR);
        channel.write_all(&frame)?;
        channel.flush()?;
        if let Some(capture) = self.capture.as_mut() {
            capture.record(Direction::Tx, &frame);
        }

        let raw = self.read_until_prompt(command)?;
        let reply = parse_reply(command, &raw);

        debug!(command, reply = %reply, raw_len = raw.len(), "exchange complete");
        if self.echo_exchanges {
            info!("{}: {}", command, reply);
        }
        Ok(reply)
    }

    fn read_until_prompt(&mut self, command: &str) -> Result<Vec<u8>, ProtocolError> {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        let mut zero_reads = 0u32;

        loop {
            self.check_interrupt()?;
            let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
            let closes_on_eof = channel.closes_on_eof();

            match channel.read(&mut byte) {
                Ok(0) if closes_on_eof => {
                    warn!(command, channel = %channel.describe(), "adapter closed the connection");
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "adapter closed the connection",
                    )
                    .into());
                }
                Ok(0) => zero_reads += 1,
                Ok(_) => {
                    zero_reads = 0;
                    raw.push(byte[0]);
                    if let Some(capture) = self.capture.as_mut() {
                        capture.record(Direction::Rx, &byte);
                    }
                    if byte[0] == PROMPT {
                        return Ok(raw);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    zero_reads += 1
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    return Err(ProtocolError::Interrupted)
                }
                Err(e) => return Err(e.into()),
            }

            if zero_reads > 0 {
                trace!(
                    command,
                    zero_reads,
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "empty read"
                );
            }
            if zero_reads >= MAX_ZERO_READS {
                warn!(command, received = raw.len(), "adapter stopped responding");
                return Err(ProtocolError::BaudMismatch {
                    command: command.to_string(),
                    attempts: zero_reads,
                });
            }
        }
    }

    fn check_interrupt(&self) -> Result<(), ProtocolError> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(ProtocolError::Interrupted),
            _ => Ok(()),
        }
    }
}
