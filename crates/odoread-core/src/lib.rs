//! # odoread Core Library
//!
//! Reads the odometer of Volvos with Motronic 4.3 engine management from the
//! COMBI instrument cluster, through an ELM327 adapter on the K-line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - AT command framing over serial, TCP or in-memory channels
//! - ELM327 initialization and capability checking
//! - The KWP mileage session with bus-init retry and teardown
//! - Mileage frame decoding
//! - Raw traffic capture for diagnostics
//!
//! ## Example
//!
//! ```rust,ignore
//! use odoread_core::protocol::{Connection, ConnectionConfig};
//!
//! let config = ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".to_string(),
//!     ..ConnectionConfig::default()
//! };
//! let mut conn = Connection::open(config)?;
//! let reading = conn.run()?;
//! println!("Mileage: {}", reading);
//! ```

pub mod capture;
pub mod mileage;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capture::Capture;
    pub use crate::mileage::MileageReading;
    pub use crate::protocol::{
        BaudRate, CapabilityVerdict, Connection, ConnectionConfig, ErrorClass, ProtocolError,
        SessionState,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
