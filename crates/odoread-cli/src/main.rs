//! odoread - reads the odometer of Motronic 4.3 Volvos
//!
//! Talks to the COMBI instrument cluster through an ELM327 adapter on a serial
//! port (or `tcp://host:port` for Wi-Fi adapters) and prints the mileage.

use anyhow::{Context, Result};
use clap::Parser;
use odoread_core::mileage::MileageReading;
use odoread_core::protocol::{
    list_ports, BaudRate, Connection, ConnectionConfig, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS,
};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "odoread")]
#[command(author, version, about = "Read the odometer of a Motronic 4.3 Volvo through an ELM327")]
struct Cli {
    /// Serial port of the adapter, or tcp://host:port
    #[arg(env = "ODOREAD_PORT", required_unless_present = "list_ports")]
    port: Option<String>,

    /// Adapter baud rate (38400 or 115200)
    #[arg(short, long, default_value_t = BaudRate::default(), value_parser = parse_baud)]
    baud: BaudRate,

    /// Debug logging, including every command and reply
    #[arg(short, long)]
    debug: bool,

    /// Print a hex dump of all traffic after the run
    #[arg(long)]
    dump: bool,

    /// Print the reading as JSON
    #[arg(long)]
    json: bool,

    /// Do not retry after a bus-init timeout
    #[arg(long)]
    no_retry: bool,

    /// Timeout of a single byte read, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Length of each settle wait before the retry, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    settle_ms: u64,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn connection_config(&self, port_name: String) -> ConnectionConfig {
        ConnectionConfig {
            port_name,
            baud_rate: self.baud,
            debug: self.debug,
            dump: self.dump,
            read_timeout: Duration::from_millis(self.timeout_ms),
            settle_delay: Duration::from_millis(self.settle_ms),
            retry_on_timing_error: !self.no_retry,
        }
    }
}

fn parse_baud(value: &str) -> Result<BaudRate, String> {
    let rate: u32 = value
        .parse()
        .map_err(|_| format!("invalid baud rate '{value}'"))?;
    BaudRate::try_from(rate).map_err(|e| e.to_string())
}

fn init_logging(debug: bool) {
    let default = if debug {
        "debug"
    } else {
        "odoread=info,odoread_core=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        let mut line = port.name.clone();
        if let Some((vid, pid)) = port.usb_id {
            line.push_str(&format!("  [{vid:04x}:{pid:04x}]"));
        }
        if let Some(product) = &port.product {
            line.push_str(&format!(" {product}"));
        }
        if port.is_known_adapter_bridge() {
            line.push_str(" (ELM327 cable bridge)");
        }
        println!("{line}");
    }
}

fn print_reading(reading: &MileageReading, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(reading).context("Failed to render reading")?;
        println!("{text}");
    } else {
        println!("Mileage: {reading}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_ports {
        print_ports();
        return Ok(());
    }
    let port_name = cli.port.clone().context("No port given")?;
    let config = cli.connection_config(port_name.clone());

    if !cli.json {
        println!("Attempting communication...");
    }
    let mut conn = Connection::open(config)
        .with_context(|| format!("Failed to open port {port_name}. ELM327 not connected?"))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;
    conn.set_interrupt(interrupted);

    let result = conn.run();
    debug!(
        port = %conn.config().port_name,
        state = ?conn.state(),
        "session finished"
    );

    if cli.dump {
        if let Some(capture) = conn.capture() {
            print!("{}", capture.dump());
        }
    }
    conn.close();

    let reading = result?;
    print_reading(&reading, cli.json)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["odoread", "/dev/ttyUSB0"]).unwrap();
        let config = cli.connection_config("/dev/ttyUSB0".to_string());
        assert_eq!(config.baud_rate, BaudRate::B38400);
        assert_eq!(config.read_timeout, Duration::from_millis(5000));
        assert_eq!(config.settle_delay, Duration::from_millis(1700));
        assert!(config.retry_on_timing_error);
        assert!(!config.dump);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "odoread",
            "tcp://192.168.0.10:35000",
            "--baud",
            "115200",
            "--no-retry",
            "--dump",
            "--settle-ms",
            "0",
        ])
        .unwrap();
        let config = cli.connection_config(cli.port.clone().unwrap());
        assert_eq!(config.baud_rate, BaudRate::B115200);
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert!(!config.retry_on_timing_error);
        assert!(config.dump);
    }

    #[test]
    fn test_rejects_unsupported_baud() {
        assert!(Cli::try_parse_from(["odoread", "COM3", "--baud", "9600"]).is_err());
    }

    #[test]
    fn test_list_ports_needs_no_port() {
        let cli = Cli::try_parse_from(["odoread", "--list-ports"]).unwrap();
        assert!(cli.list_ports);
    }
}
