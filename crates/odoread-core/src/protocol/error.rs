//! Protocol errors

use thiserror::Error;

use super::classify::ErrorClass;

/// Errors that can occur while talking to the adapter and the ECU
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Channel already released or session over
    #[error("Not connected to adapter")]
    NotConnected,

    /// Reset reply lacks the ELM327 identity
    #[error("No ELM327 device found (reset replied {0:?}). Check that the adapter is powered and plugged in.")]
    DeviceNotFound(String),

    /// Adapter stopped sending bytes mid-exchange
    #[error("No data received from the adapter after {attempts} reads while waiting for a reply to {command:?}. {hint}", hint = ErrorClass::BaudMismatch.message())]
    BaudMismatch {
        /// Command left without a reply
        command: String,
        /// Consecutive empty reads
        attempts: u32,
    },

    /// Adapter rejected init commands
    #[error(
        "Adapter does not support: {}. A compatible adapter must support: {}",
        .unsupported.join(", "),
        .required.join(", ")
    )]
    UnsupportedCapability {
        /// Init commands the adapter rejected
        unsupported: Vec<String>,
        /// Every command a compatible adapter must accept
        required: Vec<String>,
    },

    /// Bus init timed out, also after the retry
    #[error("{}", ErrorClass::ConnectionTimingError.message())]
    ConnectionTiming,

    /// Electrical fault on the K-line
    #[error("{}", ErrorClass::WiringError.message())]
    Wiring,

    /// Adapter could not receive the cluster's frame
    #[error("{}", ErrorClass::ReceptionError.message())]
    Reception,

    /// Bare `ERROR` from the adapter
    #[error("{}", ErrorClass::GenericDeviceError.message())]
    GenericDevice,

    /// Reply without a usable mileage frame
    #[error("{hint} Reply was {0:?}", hint = ErrorClass::UnexpectedPayload.message())]
    UnexpectedPayload(String),

    /// Interrupt flag raised
    #[error("Aborted by user")]
    Interrupted,

    /// Channel I/O failure, including a closed TCP connection
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// The reply classification this error corresponds to, if any
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            ProtocolError::BaudMismatch { .. } => Some(ErrorClass::BaudMismatch),
            ProtocolError::ConnectionTiming => Some(ErrorClass::ConnectionTimingError),
            ProtocolError::Wiring => Some(ErrorClass::WiringError),
            ProtocolError::Reception => Some(ErrorClass::ReceptionError),
            ProtocolError::GenericDevice => Some(ErrorClass::GenericDeviceError),
            ProtocolError::UnexpectedPayload(_) => Some(ErrorClass::UnexpectedPayload),
            _ => None,
        }
    }
}
