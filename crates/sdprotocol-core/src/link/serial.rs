//! Serial port discovery and opening

use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;

use super::{LinkError, SerialChannel};

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB product string, when the port is a USB device
    pub product: Option<String>,

    /// USB manufacturer string, when the port is a USB device
    pub manufacturer: Option<String>,
}

impl PortInfo {
    /// Port with a name and no USB details
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            product: None,
            manufacturer: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                product: usb.product,
                manufacturer: usb.manufacturer,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// Ordering key: Arduino-style ttyACM first, then ttyUSB, then the rest.
/// Numeric suffixes sort numerically so ttyACM10 follows ttyACM2.
fn port_rank(name: &str) -> (u8, u32, String) {
    let base = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB"), (2, "COM")] {
        if let Some(num) = base.strip_prefix(prefix).and_then(|n| n.parse().ok()) {
            return (rank, num, base.to_string());
        }
    }
    (3, 0, base.to_string())
}

/// Sort ports into display order
pub fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by_key(|p| port_rank(&p.name));
}

/// List all available serial ports in display order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            tracing::warn!("Port enumeration failed: {e}");
            Vec::new()
        }
    };
    sort_ports(&mut ports);
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Pick a port without asking, which is only safe when exactly one exists
pub fn auto_select_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    match ports {
        [only] => Some(only),
        _ => None,
    }
}

/// Open a serial port as 8N1 without flow control
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<SerialChannel, LinkError> {
    let port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| LinkError::Connection {
            port: name.to_string(),
            message: e.to_string(),
        })?;

    Ok(SerialChannel::new(port))
}
