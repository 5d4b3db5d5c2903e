use serialport::SerialPortType;
use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;

use super::{Result, SerialDeviceInfo, SerialError};

pub const DEFAULT_BAUD_RATE: u32 = 115200;

// Common USB-UART bridge vendors: Silicon Labs, WCH, Espressif native USB, FTDI
const KNOWN_BRIDGE_VIDS: [u16; 4] = [0x10C4, 0x1A86, 0x303A, 0x0403];

/// A readable byte stream on an opened port. Dropping it closes the port.
pub trait SerialLink: AsyncRead + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> SerialLink for T {}

/// Opens a physical port by name
pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>>;
}

/// Opens real ports through tokio-serial
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePortOpener;

impl PortOpener for NativePortOpener {
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>> {
        let stream = tokio_serial::new(port_name, baud_rate)
            .open_native_async()
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        log::info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(Box::new(stream))
    }
}

/// List USB serial ports, flagging well-known USB-UART bridges
pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
    let ports = serialport::available_ports()?;
    let mut devices = Vec::new();

    for port in ports {
        if let SerialPortType::UsbPort(usb_info) = port.port_type {
            devices.push(SerialDeviceInfo {
                port_name: port.port_name.clone(),
                vid: usb_info.vid,
                pid: usb_info.pid,
                serial_number: usb_info.serial_number.clone(),
                manufacturer: usb_info.manufacturer.clone(),
                product: usb_info.product.clone(),
                known_bridge: KNOWN_BRIDGE_VIDS.contains(&usb_info.vid),
            });
        }
    }

    // Likely targets first
    devices.sort_by_key(|d| !d.known_bridge);
    Ok(devices)
}
