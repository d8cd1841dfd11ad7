//! Protocol commands
//!
//! The fixed AT-command vocabulary used to open a KWP session with the
//! Motronic 4.3 COMBI cluster, and the text markers the ELM327 answers with.

use serde::{Deserialize, Serialize};

/// Commands sent to the ELM327 adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Read adapter supply voltage ('ATRV')
    VoltageCheck,

    /// Reset the adapter ('ATZ')
    Reset,

    /// Echo commands back ('ATE1')
    EchoOn,

    /// Disable line feeds after carriage returns ('ATL0')
    LineFeedOff,

    /// Select ISO 9141-2 / KWP slow-init protocol ('ATSP 3')
    ProtocolSelect,

    /// Show headers in replies ('ATH1')
    HeaderModeOn,

    /// Allow messages longer than seven bytes ('ATAL')
    AllowLongMessages,

    /// Keyword wake mode without keyword check ('ATKW0')
    KeywordWakeMode,

    /// Tester address ('ATTA 13')
    TesterAddress,

    /// Only receive frames addressed to the tester ('ATRA 13')
    ReceiveFilter,

    /// Set ISO init address of the target ECU ('ATIIA 51')
    TargetAddressCheck,

    /// Wake message keeping the bus alive ('ATWM 82 51 13 A1')
    WakeMessage,

    /// Session header for the mileage request ('ATSH 84 51 13')
    SessionHeader,

    /// Read the odometer counter (service B9, local id 03)
    MileageQuery,

    /// Session header for the shutdown request ('ATSH 81 51 13')
    TeardownHeader,

    /// KWP stopCommunication service ('82')
    StopCommunication,

    /// Close the current protocol ('ATPC')
    ProtocolClose,
}

impl Command {
    /// The configuration sequence sent after a successful reset, in order
    pub const INIT_SEQUENCE: [Command; 11] = [
        Command::EchoOn,
        Command::LineFeedOff,
        Command::ProtocolSelect,
        Command::HeaderModeOn,
        Command::AllowLongMessages,
        Command::KeywordWakeMode,
        Command::TesterAddress,
        Command::ReceiveFilter,
        Command::TargetAddressCheck,
        Command::WakeMessage,
        Command::SessionHeader,
    ];

    /// Commands issued after a reading, in order
    pub const TEARDOWN_SEQUENCE: [Command; 3] = [
        Command::TeardownHeader,
        Command::StopCommunication,
        Command::ProtocolClose,
    ];

    /// Command text as sent on the wire, without terminator
    pub fn text(&self) -> &'static str {
        match self {
            Command::VoltageCheck => "ATRV",
            Command::Reset => "ATZ",
            Command::EchoOn => "ATE1",
            Command::LineFeedOff => "ATL0",
            Command::ProtocolSelect => "ATSP 3",
            Command::HeaderModeOn => "ATH1",
            Command::AllowLongMessages => "ATAL",
            Command::KeywordWakeMode => "ATKW0",
            Command::TesterAddress => "ATTA 13",
            Command::ReceiveFilter => "ATRA 13",
            Command::TargetAddressCheck => "ATIIA 51",
            Command::WakeMessage => "ATWM 82 51 13 A1",
            Command::SessionHeader => "ATSH 84 51 13",
            Command::MileageQuery => "B90300",
            Command::TeardownHeader => "ATSH 81 51 13",
            Command::StopCommunication => "82",
            Command::ProtocolClose => "ATPC",
        }
    }

    /// Whether the reply must be exactly `OK` for the command to count as supported
    pub fn requires_exact_ok(&self) -> bool {
        matches!(self, Command::TargetAddressCheck)
    }

    /// Every command a compatible adapter has to accept during a full run
    pub fn required_by_session() -> Vec<Command> {
        let mut commands = vec![Command::VoltageCheck, Command::Reset];
        commands.extend(Self::INIT_SEQUENCE);
        commands.push(Command::MileageQuery);
        commands.extend(Self::TEARDOWN_SEQUENCE);
        commands
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// Text markers found in adapter replies
pub mod markers {
    /// Substring identifying the adapter family in the reset banner
    pub const IDENTITY: &str = "ELM327";
    /// Reply to a command the adapter does not understand
    pub const UNSUPPORTED: &str = "?";
    /// Plain acknowledgement
    pub const OK: &str = "OK";

    /// Prefix of the bus initialization banner
    pub const BUS_INIT: &str = "BUS INIT:";
    /// Bus init completed
    pub const BUS_INIT_OK: &str = "BUS INIT: ...OK";
    /// Bus init timed out waiting for the ECU
    pub const BUS_INIT_ERROR: &str = "BUS INIT: ...ERROR";

    /// Electrical problem on the K-line
    pub const BUS_ERRORS: [&str; 2] = ["BUS ERROR", "FB ERROR"];
    /// Frame with bad checksum or unexpected length
    pub const DATA_ERROR: &str = "DATA ERROR";
    /// Adapter failed to receive a frame
    pub const RX_ERROR: &str = "RX ERROR";
    /// Any other adapter error
    pub const ERROR: &str = "ERROR";

    /// Start of a genuine mileage response frame: format 0x85, target 0x13,
    /// source 0x51, positive response 0xF9 to service 0xB9
    pub const MILEAGE_ANCHOR: &str = "85 13 51 F9";
}
