//! Byte streams to the adapter
//!
//! USB and Bluetooth ELM327s show up as serial ports, Wi-Fi clones as a TCP
//! socket (usually 192.168.0.10:35000). Both, and the test mock, sit behind
//! [`CommunicationChannel`] so the framer never knows which one it drives.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Port Wi-Fi ELM327 clones listen on when none is given
pub const DEFAULT_TCP_PORT: u16 = 35000;

/// Half-duplex byte stream to an ELM327
pub trait CommunicationChannel: Read + Write + Send {
    /// Timeout of a single read or write call
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;

    /// Whether a zero-byte read means the peer went away rather than a
    /// read timeout
    fn closes_on_eof(&self) -> bool {
        false
    }
}

/// USB or Bluetooth adapter behind a serial port
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened and configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn describe(&self) -> String {
        let name = self.port.name().unwrap_or_else(|| "serial".to_string());
        match self.port.baud_rate() {
            Ok(baud) => format!("{name} @ {baud}"),
            Err(_) => name,
        }
    }
}

/// Wi-Fi adapter reached over TCP
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Connect to `host[:port]`, trying each resolved address within `timeout`
    pub fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let target = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{addr}:{DEFAULT_TCP_PORT}")
        };

        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address for {target}"),
        );
        for socket_addr in target.to_socket_addrs()? {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let mut channel = Self::new(stream);
                    channel.set_timeout(timeout)?;
                    return Ok(channel);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl CommunicationChannel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // Sockets have no flush-input call: drain until WouldBlock
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let drained = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        drained
    }

    fn closes_on_eof(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        match self.stream.peer_addr() {
            Ok(addr) => format!("tcp://{addr}"),
            Err(_) => "tcp".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_channel_exchange_and_drain() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"stale bytes\r>").unwrap();
            let mut cmd = [0u8; 4];
            sock.read_exact(&mut cmd).unwrap();
            assert_eq!(&cmd, b"ATZ\r");
            sock.write_all(b"ELM327 v1.5\r\r>").unwrap();
        });

        let mut channel = TcpChannel::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
        assert_eq!(channel.describe(), format!("tcp://{addr}"));

        // Give the stale bytes time to arrive before draining them
        thread::sleep(Duration::from_millis(100));
        channel.clear_input_buffer().unwrap();

        channel.write_all(b"ATZ\r").unwrap();
        let mut reply = [0u8; 14];
        channel.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ELM327 v1.5\r\r>");
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(TcpChannel::connect(&format!("127.0.0.1:{port}"), Duration::from_millis(200)).is_err());
    }
}
