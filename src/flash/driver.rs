use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Application partition offset; bootloader and partition table stay untouched
pub const DEFAULT_FLASH_OFFSET: u32 = 0x10000;

/// Bytes to place at a flash offset
#[derive(Debug, Clone)]
pub struct FlashSegment {
    pub offset: u32,
    pub data: Arc<[u8]>,
}

/// Flash size/mode/frequency. `None` keeps what the device already has.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashGeometry {
    pub size: Option<String>,
    pub mode: Option<String>,
    pub frequency: Option<String>,
}

impl FlashGeometry {
    pub fn keep() -> Self {
        Self::default()
    }

    pub fn is_keep(&self) -> bool {
        self.size.is_none() && self.mode.is_none() && self.frequency.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub segments: Vec<FlashSegment>,
    pub geometry: FlashGeometry,
    pub compress: bool,
    pub erase_all: bool,
}

impl WriteRequest {
    /// One image at `offset`, compressed, device geometry preserved, no chip erase
    pub fn single(offset: u32, data: Arc<[u8]>) -> Self {
        Self {
            segments: vec![FlashSegment { offset, data }],
            geometry: FlashGeometry::keep(),
            compress: true,
            erase_all: false,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }
}

/// `(file_index, written_bytes, total_bytes)`; called from the driver's own
/// thread and must return immediately
pub type ProgressFn = Arc<dyn Fn(usize, usize, usize) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Could not open port: {0}")]
    Port(String),

    #[error("Bootloader did not respond: {0}")]
    Handshake(String),

    #[error("Flash write failed: {0}")]
    Write(String),

    #[error("Driver used before handshake")]
    NotConnected,

    #[error("Driver task failed: {0}")]
    Task(String),
}

/// One flashing session bound to a released port
#[async_trait]
pub trait FlashDriver: Send {
    /// Put the target into its bootloader and sync with it
    async fn handshake(&mut self) -> Result<(), DriverError>;

    async fn write_flash(&mut self, request: WriteRequest, progress: ProgressFn) -> Result<(), DriverError>;
}

/// Builds a driver session for a port the connection manager just released
pub trait DriverFactory: Send + Sync {
    fn create(&self, port_name: &str, baud_rate: u32) -> Box<dyn FlashDriver>;
}
