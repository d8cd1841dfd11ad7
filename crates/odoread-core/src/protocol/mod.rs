//! ELM327 / KWP protocol engine
//!
//! Talks to the Motronic 4.3 COMBI instrument cluster through an ELM327
//! adapter: AT command framing, adapter initialization, reply classification
//! and the mileage session state machine.

pub mod classify;
pub mod commands;
mod connection;
pub mod device;
mod error;
pub mod framer;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod serial;
pub mod stream;

pub use classify::{classify, ErrorClass};
pub use commands::Command;
pub use connection::{locate_payload, Connection, ConnectionConfig, SessionState};
pub use device::CapabilityVerdict;
pub use error::ProtocolError;
pub use framer::{Framer, ParsedReply};
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub use mock::{MockChannel, MockHandle};
pub use serial::{list_ports, open_port, BaudRate, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel, TcpChannel};

/// Default timeout of a single one-byte read in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default length of one settle wait before the retry, in milliseconds
pub const DEFAULT_SETTLE_MS: u64 = 1700;

/// Number of settle waits before the retry
pub const SETTLE_STEPS: u32 = 3;
