//! Adapter initialization
//!
//! Resets the ELM327, checks its identity and sends the configuration needed
//! to talk KWP to the COMBI cluster, recording which commands the adapter
//! rejected. Cheap clones often answer `?` to the less common commands
//! (`ATIIA`, `ATWM`), which makes the mileage query impossible.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{commands::markers, framer::Framer, Command, ParsedReply, ProtocolError};

/// Outcome of the init sequence: which commands the adapter accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityVerdict {
    /// Reset banner, e.g. "ELM327 v1.5"
    pub identity: String,
    /// Voltage reported before reset; informational only
    pub voltage: String,
    /// Each init command with whether the adapter supported it, in send order
    pub results: Vec<(Command, bool)>,
    /// True when every command was supported
    pub capable: bool,
}

impl CapabilityVerdict {
    fn from_results(identity: String, voltage: String, results: Vec<(Command, bool)>) -> Self {
        let capable = results.iter().all(|(_, supported)| *supported);
        Self {
            identity,
            voltage,
            results,
            capable,
        }
    }

    /// Commands the adapter rejected
    pub fn unsupported(&self) -> Vec<Command> {
        self.results
            .iter()
            .filter(|(_, supported)| !supported)
            .map(|(command, _)| *command)
            .collect()
    }

    /// Error describing the deficiency, or `None` for a capable adapter
    pub fn deficiency(&self) -> Option<ProtocolError> {
        if self.capable {
            return None;
        }
        Some(ProtocolError::UnsupportedCapability {
            unsupported: self.unsupported().iter().map(|c| c.to_string()).collect(),
            required: Command::required_by_session()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        })
    }
}

/// Whether `reply` shows the adapter accepted `command`
pub fn is_supported(command: Command, reply: &ParsedReply) -> bool {
    if reply.contains(markers::UNSUPPORTED) {
        return false;
    }
    !command.requires_exact_ok() || reply.as_str() == markers::OK
}

/// Run the reset and configuration sequence
pub fn initialize(framer: &mut Framer) -> Result<CapabilityVerdict, ProtocolError> {
    let voltage = framer.exchange(Command::VoltageCheck)?.into_string();
    info!(voltage = %voltage, "adapter supply voltage");

    let identity = framer.exchange(Command::Reset)?;
    if !identity.contains(markers::IDENTITY) {
        warn!(reply = %identity, "reset reply does not identify an ELM327");
        return Err(ProtocolError::DeviceNotFound(identity.into_string()));
    }
    info!("Initialized device: {}", identity);

    let mut results = Vec::with_capacity(Command::INIT_SEQUENCE.len());
    for command in Command::INIT_SEQUENCE {
        let reply = framer.exchange(command)?;
        let supported = is_supported(command, &reply);
        if supported {
            debug!(%command, "accepted");
        } else {
            warn!(%command, reply = %reply, "adapter does not support command");
        }
        results.push((command, supported));
    }

    Ok(CapabilityVerdict::from_results(
        identity.into_string(),
        voltage,
        results,
    ))
}
