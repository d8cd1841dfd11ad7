//! Reply classification
//!
//! Maps a cleaned adapter reply onto an [`ErrorClass`]. The adapter's error
//! markers overlap ("BUS ERROR" also contains "ERROR"), so checks run from the
//! most specific marker to the least specific one.

use serde::{Deserialize, Serialize};

use super::commands::markers;

/// Category of a reply, derived from its text alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// No error marker present
    None,
    /// Bus initialization timed out
    ConnectionTimingError,
    /// Electrical fault on the diagnostic bus
    WiringError,
    /// Bad frame mixed into an otherwise usable reply
    BenignDataArtifact,
    /// Adapter could not receive the ECU's frame
    ReceptionError,
    /// Unspecified adapter error
    GenericDeviceError,
    /// Reply without a recognizable mileage frame
    UnexpectedPayload,
    /// No bytes at all from the adapter
    BaudMismatch,
}

impl ErrorClass {
    /// Whether this class aborts the session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ErrorClass::None | ErrorClass::BenignDataArtifact)
    }

    /// Remediation message shown to the user
    pub fn message(&self) -> &'static str {
        match self {
            ErrorClass::None | ErrorClass::BenignDataArtifact => "",
            ErrorClass::ConnectionTimingError => {
                "Bus initialization failed twice. Turn the ignition key to position II, \
                 check that the battery voltage is above 12 V and try again after a few seconds."
            }
            ErrorClass::WiringError => {
                "The adapter reported a bus error. Check the OBD cable and connector, \
                 the ECU fuse and that the ignition is on."
            }
            ErrorClass::ReceptionError => {
                "The adapter could not receive the reply from the instrument cluster. \
                 Check the cable and its ground connection, then unplug and replug the adapter."
            }
            ErrorClass::GenericDeviceError => {
                "The adapter returned ERROR. Car not connected, ignition off, \
                 or incompatible vehicle?"
            }
            ErrorClass::UnexpectedPayload => {
                "The instrument cluster did not send a mileage frame. \
                 Is this a Motronic 4.3 vehicle? Try again with the ignition on."
            }
            ErrorClass::BaudMismatch => {
                "Confirm that the baud rate (38400 or 115200) matches the adapter \
                 and that the adapter is powered."
            }
        }
    }
}

/// Classify a cleaned reply
pub fn classify(reply: &str) -> ErrorClass {
    if reply.contains(markers::BUS_INIT_ERROR) {
        ErrorClass::ConnectionTimingError
    } else if markers::BUS_ERRORS.iter().any(|m| reply.contains(m)) {
        ErrorClass::WiringError
    } else if reply.contains(markers::DATA_ERROR) {
        ErrorClass::BenignDataArtifact
    } else if reply.contains(markers::RX_ERROR) {
        ErrorClass::ReceptionError
    } else if reply.contains(markers::ERROR) {
        ErrorClass::GenericDeviceError
    } else {
        ErrorClass::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reply() {
        assert_eq!(classify("85 13 51 F9 03 5D 43 85"), ErrorClass::None);
        assert_eq!(classify(""), ErrorClass::None);
        assert_eq!(classify("NO DATA"), ErrorClass::None);
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            classify("BUS INIT: ...ERROR"),
            ErrorClass::ConnectionTimingError
        );
        assert_eq!(classify("BUS INIT: ...BUS ERROR"), ErrorClass::WiringError);
        assert_eq!(classify("FB ERROR"), ErrorClass::WiringError);
        assert_eq!(
            classify("85 13 51 F9 03 5D 43 85\r<DATA ERROR"),
            ErrorClass::BenignDataArtifact
        );
        assert_eq!(classify("<RX ERROR"), ErrorClass::ReceptionError);
        assert_eq!(classify("ERROR"), ErrorClass::GenericDeviceError);
    }

    #[test]
    fn test_bus_init_ok_is_not_an_error() {
        assert_eq!(
            classify("BUS INIT: ...OK\r85 13 51 F9 03 5D 43 85"),
            ErrorClass::None
        );
    }

    #[test]
    fn test_fatal_classes_have_messages() {
        for class in [
            ErrorClass::ConnectionTimingError,
            ErrorClass::WiringError,
            ErrorClass::ReceptionError,
            ErrorClass::GenericDeviceError,
            ErrorClass::UnexpectedPayload,
            ErrorClass::BaudMismatch,
        ] {
            assert!(class.is_fatal());
            assert!(!class.message().is_empty(), "{class:?}");
        }
        assert!(!ErrorClass::BenignDataArtifact.is_fatal());
        assert!(!ErrorClass::None.is_fatal());
    }
}
