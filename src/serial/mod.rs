pub mod interface;
pub mod monitor;
pub mod selector;

pub use interface::{discover_ports, NativePortOpener, PortOpener, SerialLink, DEFAULT_BAUD_RATE};
pub use monitor::{MonitorHandle, ReadLock, ReaderSlot};
pub use selector::{FixedPortSelector, PortSelector, PromptPortSelector, SelectionError};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub known_bridge: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
