// src/io/serial/ports.rs
//
// Serial port enumeration for the `list-ports` command, so operators can find
// the right --port / --port-pattern for their board.

use serde::Serialize;
use std::fmt;

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl fmt::Display for SerialPortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<28} {}", self.port_name, self.port_type)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " {:04x}:{:04x}", vid, pid)?;
        }
        for detail in [&self.manufacturer, &self.product, &self.serial_number]
            .into_iter()
            .flatten()
        {
            write!(f, " {}", detail)?;
        }
        Ok(())
    }
}

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The cu (calling unit) devices are non-blocking and preferred for outgoing connections.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    let mut infos: Vec<SerialPortInfo> = ports
        .into_iter()
        .filter(|p| keep_port(&p.port_name))
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect();
    infos.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(infos)
}

fn keep_port(name: &str) -> bool {
    if cfg!(target_os = "macos") {
        !name.starts_with("/dev/tty.")
    } else {
        true
    }
}
