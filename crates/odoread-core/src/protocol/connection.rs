//! Session management
//!
//! [`Connection`] owns the channel to the adapter and walks one run through
//! its states: initialize the adapter, request the mileage (with at most one
//! retry after a bus-init timeout), locate and decode the payload, then close
//! the KWP session so the next run can wake the bus again.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    classify::{classify, ErrorClass},
    commands::markers,
    device::{self, CapabilityVerdict},
    framer::Framer,
    serial::{open_port, BaudRate},
    stream::{CommunicationChannel, TcpChannel},
    Command, ParsedReply, ProtocolError, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS, SETTLE_STEPS,
};
use crate::capture::Capture;
use crate::mileage::{self, MileageReading};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Channel open, nothing sent
    Idle,
    /// Reset and configuration in progress
    Initializing,
    /// Adapter accepted every init command
    Capable,
    /// Adapter rejected at least one init command
    Incapable,
    /// Mileage request in flight
    Querying,
    /// Bus woke up
    BusInitOk,
    /// Bus init timed out
    BusInitError {
        /// Whether this is the reply to the retried query
        retried: bool,
    },
    /// Bus init hit an electrical fault
    BusInitWiring,
    /// Mileage frame found in the reply
    PayloadLocated,
    /// Run aborted
    Failed,
    /// Run over
    Terminated,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Capable | Incapable | Failed)
                | (Capable, Querying)
                | (Incapable, Terminated)
                | (
                    Querying,
                    BusInitOk | BusInitError { .. } | BusInitWiring | PayloadLocated | Failed
                )
                | (BusInitOk, PayloadLocated | Failed)
                | (BusInitError { retried: false }, Querying)
                | (BusInitError { .. }, Failed)
                | (BusInitWiring, Failed)
                | (PayloadLocated, Terminated | Failed)
                | (Failed, Terminated)
        )
    }
}

/// Immutable settings for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port name, or `tcp://host:port` for Wi-Fi adapters
    pub port_name: String,
    /// Serial baud rate
    pub baud_rate: BaudRate,
    /// Log every command/reply pair
    pub debug: bool,
    /// Keep a copy of all traffic for a later dump
    pub dump: bool,
    /// Timeout of a single one-byte read
    pub read_timeout: Duration,
    /// Length of each of the settle waits before the retry
    pub settle_delay: Duration,
    /// Retry the mileage request once after a bus-init timeout
    pub retry_on_timing_error: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BaudRate::default(),
            debug: false,
            dump: false,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_MS),
            retry_on_timing_error: true,
        }
    }
}

/// Outcome of the bus initialization banner preceding a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusInit {
    Ok,
    TimingError,
    BusError,
}

impl BusInit {
    fn parse(reply: &str) -> Option<Self> {
        if !reply.starts_with(markers::BUS_INIT) {
            return None;
        }
        let banner = reply.split(['\r', '\n']).next().unwrap_or_default();
        if markers::BUS_ERRORS.iter().any(|m| banner.contains(m)) {
            Some(BusInit::BusError)
        } else if banner.contains(markers::BUS_INIT_ERROR) {
            Some(BusInit::TimingError)
        } else if banner.contains(markers::BUS_INIT_OK) {
            Some(BusInit::Ok)
        } else {
            None
        }
    }
}

/// Slice of `reply` starting at the mileage frame, skipping banners and
/// response-pending frames in front of it
pub fn locate_payload(reply: &str) -> Option<&str> {
    reply
        .to_ascii_uppercase()
        .find(markers::MILEAGE_ANCHOR)
        .map(|start| &reply[start..])
}

/// Map a fatal reply class onto the error reported to the user
fn class_error(class: ErrorClass, reply: &ParsedReply) -> Option<ProtocolError> {
    match class {
        ErrorClass::None | ErrorClass::BenignDataArtifact => None,
        ErrorClass::ConnectionTimingError => Some(ProtocolError::ConnectionTiming),
        ErrorClass::WiringError => Some(ProtocolError::Wiring),
        ErrorClass::ReceptionError => Some(ProtocolError::Reception),
        ErrorClass::GenericDeviceError => Some(ProtocolError::GenericDevice),
        ErrorClass::UnexpectedPayload | ErrorClass::BaudMismatch => {
            Some(ProtocolError::UnexpectedPayload(reply.to_string()))
        }
    }
}

/// Mileage session with an ELM327 adapter
pub struct Connection {
    framer: Framer,
    config: ConnectionConfig,
    state: SessionState,
    history: Vec<SessionState>,
    verdict: Option<CapabilityVerdict>,
}

impl Connection {
    /// Wrap an already open channel
    pub fn new(
        channel: Box<dyn CommunicationChannel>,
        config: ConnectionConfig,
    ) -> Result<Self, ProtocolError> {
        let framer = Framer::new(channel, &config)?;
        Ok(Self {
            framer,
            config,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            verdict: None,
        })
    }

    /// Open the port named in `config` and wrap it
    pub fn open(config: ConnectionConfig) -> Result<Self, ProtocolError> {
        let channel: Box<dyn CommunicationChannel> = match config.port_name.strip_prefix("tcp://")
        {
            Some(addr) => Box::new(TcpChannel::connect(addr, config.read_timeout)?),
            None => Box::new(open_port(
                &config.port_name,
                config.baud_rate,
                config.read_timeout,
            )?),
        };
        Self::new(channel, config)
    }

    /// Abort the run as soon as `flag` is raised
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.framer.set_interrupt(flag);
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Settings this connection was opened with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Verdict of the init sequence, once it ran
    pub fn verdict(&self) -> Option<&CapabilityVerdict> {
        self.verdict.as_ref()
    }

    /// Captured traffic when `dump` is enabled
    pub fn capture(&self) -> Option<&Capture> {
        self.framer.capture()
    }

    /// Release the channel
    pub fn close(&mut self) {
        self.framer.close();
    }

    /// Initialize the adapter, read the mileage and close the bus session
    pub fn run(&mut self) -> Result<MileageReading, ProtocolError> {
        debug!(
            port = %self.config.port_name,
            baud = %self.config.baud_rate,
            "starting mileage session"
        );
        let verdict = self.initialize()?;
        if let Some(deficiency) = verdict.deficiency() {
            self.advance(SessionState::Terminated);
            return Err(deficiency);
        }
        let reading = self.read_mileage()?;
        self.teardown()?;
        Ok(reading)
    }

    /// Reset and configure the adapter. The verdict is computed once.
    pub fn initialize(&mut self) -> Result<CapabilityVerdict, ProtocolError> {
        if let Some(verdict) = &self.verdict {
            return Ok(verdict.clone());
        }
        if self.state != SessionState::Idle || !self.framer.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        self.advance(SessionState::Initializing);
        match device::initialize(&mut self.framer) {
            Ok(verdict) => {
                self.advance(if verdict.capable {
                    SessionState::Capable
                } else {
                    SessionState::Incapable
                });
                self.verdict = Some(verdict.clone());
                Ok(verdict)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Request and decode the mileage; requires a capable adapter
    pub fn read_mileage(&mut self) -> Result<MileageReading, ProtocolError> {
        if self.state != SessionState::Capable {
            debug!(state = ?self.state, "mileage requested outside the capable state");
            return Err(ProtocolError::NotConnected);
        }
        self.query().map_err(|e| self.fail(e))
    }

    /// Close the KWP session after a reading: shutdown header, stopCommunication,
    /// protocol close. Runs at most once; does nothing before a reading.
    ///
    /// A failed command ends the run: the bus may still be open, so the
    /// reading is not reported.
    pub fn teardown(&mut self) -> Result<(), ProtocolError> {
        if self.state != SessionState::PayloadLocated {
            return Ok(());
        }
        for command in Command::TEARDOWN_SEQUENCE {
            if let Err(e) = self.framer.exchange(command) {
                warn!(%command, error = %e, "bus session teardown incomplete");
                return Err(self.fail(e));
            }
        }
        self.advance(SessionState::Terminated);
        Ok(())
    }

    fn query(&mut self) -> Result<MileageReading, ProtocolError> {
        let mut retried = false;
        let reply = loop {
            self.advance(SessionState::Querying);
            let reply = self.framer.exchange(Command::MileageQuery)?;

            match BusInit::parse(&reply) {
                Some(BusInit::Ok) => {
                    self.advance(SessionState::BusInitOk);
                    break reply;
                }
                Some(BusInit::TimingError) => {
                    self.advance(SessionState::BusInitError { retried });
                    if retried || !self.config.retry_on_timing_error {
                        break reply;
                    }
                    self.recover()?;
                    retried = true;
                }
                Some(BusInit::BusError) => {
                    self.advance(SessionState::BusInitWiring);
                    break reply;
                }
                None => break reply,
            }
        };

        let class = classify(&reply);
        if class == ErrorClass::BenignDataArtifact {
            debug!(reply = %reply, "data error in reply, looking for a usable frame");
        }
        if let Some(err) = class_error(class, &reply) {
            return Err(err);
        }

        let payload = locate_payload(&reply)
            .ok_or_else(|| ProtocolError::UnexpectedPayload(reply.to_string()))?;
        self.advance(SessionState::PayloadLocated);

        let reading = mileage::decode(payload)?;
        info!(
            miles = reading.miles,
            kilometers = reading.kilometers,
            "mileage read"
        );
        Ok(reading)
    }

    /// Close the protocol and let the bus settle before the single retry
    fn recover(&mut self) -> Result<(), ProtocolError> {
        warn!("bus init timed out, closing protocol and retrying once");
        self.framer.exchange(Command::ProtocolClose)?;
        for step in 1..=SETTLE_STEPS {
            std::thread::sleep(self.config.settle_delay);
            info!(step, of = SETTLE_STEPS, "waiting for the bus to settle");
        }
        self.framer.clear_input()
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        debug!(state = ?self.state, error = %err, "session failed");
        self.advance(SessionState::Failed);
        self.advance(SessionState::Terminated);
        err
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MockChannel;
    use pretty_assertions::assert_eq;

    fn connection(mock: MockChannel) -> Connection {
        let config = ConnectionConfig {
            settle_delay: Duration::ZERO,
            ..ConnectionConfig::default()
        };
        Connection::new(Box::new(mock), config).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.settle_delay * SETTLE_STEPS, Duration::from_millis(5100));
        assert!(config.retry_on_timing_error);
        assert_eq!(config.baud_rate, BaudRate::B38400);
    }

    #[test]
    fn test_bus_init_banner_parsing() {
        assert_eq!(BusInit::parse("BUS INIT: ...OK\r85 13"), Some(BusInit::Ok));
        assert_eq!(
            BusInit::parse("BUS INIT: ...ERROR"),
            Some(BusInit::TimingError)
        );
        assert_eq!(
            BusInit::parse("BUS INIT: ...BUS ERROR"),
            Some(BusInit::BusError)
        );
        assert_eq!(BusInit::parse("85 13 51 F9"), None);
        assert_eq!(BusInit::parse("ERROR"), None);
    }

    #[test]
    fn test_locate_payload_is_case_insensitive() {
        let reply = "BUS INIT: ...OK\r84 13 51 7e b9 23 42\r85 13 51 f9 03 5d 43 85";
        assert_eq!(locate_payload(reply), Some("85 13 51 f9 03 5d 43 85"));
        assert_eq!(locate_payload("NO DATA"), None);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_advance_to(Initializing));
        assert!(BusInitError { retried: false }.can_advance_to(Querying));
        assert!(!BusInitError { retried: true }.can_advance_to(Querying));
        assert!(!Terminated.can_advance_to(Idle));
        assert!(!Incapable.can_advance_to(Querying));
        assert!(!PayloadLocated.can_advance_to(Querying));
    }

    #[test]
    fn test_full_run_history() {
        let mock = MockChannel::elm327().respond("B90300", "BUS INIT: ...OK\r85 13 51 F9 03 5D 43 85");
        let mut conn = connection(mock);
        let reading = conn.run().unwrap();

        assert_eq!(reading.miles, 172450);
        assert_eq!(
            conn.history(),
            &[
                SessionState::Idle,
                SessionState::Initializing,
                SessionState::Capable,
                SessionState::Querying,
                SessionState::BusInitOk,
                SessionState::PayloadLocated,
                SessionState::Terminated,
            ]
        );
    }

    #[test]
    fn test_read_mileage_requires_initialization() {
        let mut conn = connection(MockChannel::elm327());
        assert!(matches!(
            conn.read_mileage(),
            Err(ProtocolError::NotConnected)
        ));
        assert_eq!(conn.state(), SessionState::Idle);
    }

    #[test]
    fn test_initialize_runs_once() {
        let mock = MockChannel::elm327();
        let handle = mock.handle();
        let mut conn = connection(mock);
        let first = conn.initialize().unwrap();
        let second = conn.initialize().unwrap();
        assert_eq!(first, second);
        assert_eq!(handle.count("ATZ"), 1);
    }

    #[test]
    fn test_teardown_only_after_reading() {
        let mock = MockChannel::elm327();
        let handle = mock.handle();
        let mut conn = connection(mock);
        conn.initialize().unwrap();
        conn.teardown().unwrap();
        assert_eq!(handle.count("82"), 0);
        assert_eq!(conn.state(), SessionState::Capable);
    }
}
