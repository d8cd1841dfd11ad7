//! Serial port handling
//!
//! Provides low-level serial port access to the ELM327 adapter.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::debug;

use super::{stream::SerialChannel, ProtocolError};

/// Information about a serial port an adapter might be attached to
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "/dev/rfcomm0" or "COM3")
    pub name: String,

    /// USB vendor and product ID (if USB device)
    pub usb_id: Option<(u16, u16)>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            usb_id: None,
            product: None,
        }
    }

    /// Whether the USB bridge is one commonly found in ELM327 cables
    /// (FTDI FT232, WCH CH340, Prolific PL2303, Silabs CP210x)
    pub fn is_known_adapter_bridge(&self) -> bool {
        matches!(
            self.usb_id,
            Some((0x0403, _)) | Some((0x1a86, _)) | Some((0x067b, _)) | Some((0x10c4, _))
        )
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key putting USB-serial cables first, then Bluetooth rfcomm links,
/// then CDC-ACM devices, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in ["ttyUSB", "rfcomm", "ttyACM"].iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank as u8, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Bluetooth rfcomm bindings are not reported by the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if ["ttyUSB", "rfcomm", "ttyACM"]
                    .iter()
                    .any(|prefix| fname.starts_with(prefix))
                {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Baud rates the ELM327 adapters in the field are configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaudRate {
    /// Factory default of genuine ELM327 v1.x chips
    #[default]
    B38400,
    /// Common default of clones
    B115200,
}

impl BaudRate {
    /// Baud rate in bits per second
    pub fn as_u32(&self) -> u32 {
        match self {
            BaudRate::B38400 => 38400,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            38400 => Ok(BaudRate::B38400),
            115200 => Ok(BaudRate::B115200),
            other => Err(ProtocolError::SerialError(format!(
                "unsupported baud rate {other}, expected 38400 or 115200"
            ))),
        }
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Open a serial port to the adapter, configured 8N1 with the given per-read timeout
pub fn open_port(
    name: &str,
    baud_rate: BaudRate,
    timeout: Duration,
) -> Result<SerialChannel, ProtocolError> {
    let mut port = serialport::new(name, baud_rate.as_u32())
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    configure_port(port.as_mut())?;
    clear_buffers(port.as_mut())?;
    debug!(port = name, baud = %baud_rate, "serial port opened");
    Ok(SerialChannel::new(port))
}

/// Configure a serial port for adapter communication
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    // Some USB adapters only power their transceiver with DTR asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_is_ordered_and_unique() {
        let ports = list_ports();
        let keys: Vec<_> = ports.iter().map(|p| port_sort_key(&p.name)).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let mut names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        names.dedup();
        assert_eq!(names.len(), ports.len());
    }

    #[test]
    fn test_baud_rate_conversion() {
        assert_eq!(BaudRate::try_from(38400).unwrap(), BaudRate::B38400);
        assert_eq!(BaudRate::try_from(115200).unwrap(), BaudRate::B115200);
        assert!(BaudRate::try_from(9600).is_err());
        assert_eq!(BaudRate::default().as_u32(), 38400);
        assert_eq!(BaudRate::B115200.to_string(), "115200");
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyACM0",
            "/dev/rfcomm0",
            "/dev/ttyUSB1",
            "/dev/someport",
            "/dev/ttyUSB0",
            "/dev/ttyUSB10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/rfcomm0",
                "/dev/ttyACM0",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_known_adapter_bridge() {
        let mut port = PortInfo::bare("/dev/ttyUSB0".to_string());
        assert!(!port.is_known_adapter_bridge());
        port.usb_id = Some((0x1a86, 0x7523));
        assert!(port.is_known_adapter_bridge());
    }
}
