//! Flashing driver backed by `espflash`.
//!
//! `espflash` is blocking, so every call runs on the blocking pool. The
//! flasher moves into the blocking task and comes back with the result.

use async_trait::async_trait;
use espflash::connection::{Connection, ResetAfterOperation, ResetBeforeOperation};
use espflash::flasher::Flasher;
use espflash::image_format::Segment;
use espflash::target::ProgressCallbacks;
use serialport::UsbPortInfo;

use super::driver::{DriverError, DriverFactory, FlashDriver, ProgressFn, WriteRequest};

pub struct EspflashFactory;

impl DriverFactory for EspflashFactory {
    fn create(&self, port_name: &str, baud_rate: u32) -> Box<dyn FlashDriver> {
        Box::new(EspflashDriver {
            port_name: port_name.to_string(),
            baud_rate,
            flasher: None,
        })
    }
}

pub struct EspflashDriver {
    port_name: String,
    baud_rate: u32,
    flasher: Option<Flasher>,
}

/// USB identity of the port; espflash picks its reset strategy from it
fn usb_port_info(port_name: &str) -> UsbPortInfo {
    let unknown = UsbPortInfo {
        vid: 0,
        pid: 0,
        serial_number: None,
        manufacturer: None,
        product: None,
    };

    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.port_name == port_name)
        .and_then(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(info) => Some(info),
            _ => None,
        })
        .unwrap_or(unknown)
}

fn connect(port_name: &str, baud_rate: u32) -> Result<Flasher, DriverError> {
    let serial_port = serialport::new(port_name, baud_rate)
        .open_native()
        .map_err(|e| DriverError::Port(e.to_string()))?;

    let connection = Connection::new(
        serial_port,
        usb_port_info(port_name),
        ResetAfterOperation::default(),
        ResetBeforeOperation::default(),
        baud_rate,
    );

    Flasher::connect(
        connection, true,  // use stub
        false, // verify
        false, // skip
        None,  // chip
        None,  // target_baud
    )
    .map_err(|e| DriverError::Handshake(e.to_string()))
}

/// Scale a 1-based chunk index to bytes of a segment split into `chunks`
fn chunks_to_bytes(chunk: usize, chunks: usize, bytes: usize) -> usize {
    if chunks == 0 {
        return 0;
    }
    (chunk.min(chunks) as u64 * bytes as u64 / chunks as u64) as usize
}

/// Forwards espflash progress to the orchestrator's callback. espflash counts
/// chunks; the callback gets bytes of the segment being written.
struct ProgressBridge {
    callback: ProgressFn,
    segment_lengths: Vec<usize>,
    file_index: usize,
    chunks: usize,
    bytes: usize,
    started: bool,
}

impl ProgressBridge {
    fn new(callback: ProgressFn, segment_lengths: Vec<usize>) -> Self {
        Self {
            callback,
            segment_lengths,
            file_index: 0,
            chunks: 0,
            bytes: 0,
            started: false,
        }
    }
}

impl ProgressCallbacks for ProgressBridge {
    fn init(&mut self, _addr: u32, num_chunks: usize) {
        if self.started {
            self.file_index += 1;
        }
        self.started = true;
        self.chunks = num_chunks;
        self.bytes = self.segment_lengths.get(self.file_index).copied().unwrap_or(0);
        (self.callback)(self.file_index, 0, self.bytes);
    }

    fn update(&mut self, chunk: usize) {
        let written = chunks_to_bytes(chunk, self.chunks, self.bytes);
        (self.callback)(self.file_index, written, self.bytes);
    }

    fn verifying(&mut self) {}

    fn finish(&mut self, _skipped: bool) {
        (self.callback)(self.file_index, self.bytes, self.bytes);
    }
}

#[async_trait]
impl FlashDriver for EspflashDriver {
    async fn handshake(&mut self) -> Result<(), DriverError> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let flasher = tokio::task::spawn_blocking(move || connect(&port_name, baud_rate))
            .await
            .map_err(|e| DriverError::Task(e.to_string()))??;

        log::info!("Bootloader handshake complete, chip: {}", flasher.chip());
        self.flasher = Some(flasher);
        Ok(())
    }

    async fn write_flash(&mut self, request: WriteRequest, progress: ProgressFn) -> Result<(), DriverError> {
        let mut flasher = self.flasher.take().ok_or(DriverError::NotConnected)?;

        if !request.compress {
            log::debug!("espflash always compresses flash writes");
        }
        if !request.geometry.is_keep() {
            log::warn!("Raw binary writes keep the device flash geometry; override ignored");
        }
        let (flasher, result) = tokio::task::spawn_blocking(move || {
            if request.erase_all {
                if let Err(e) = flasher.erase_flash() {
                    return (flasher, Err(e));
                }
            }
            let segments: Vec<Segment<'_>> = request
                .segments
                .iter()
                .map(|s| Segment::new(s.offset, &s.data))
                .collect();
            let segment_lengths = request.segments.iter().map(|s| s.data.len()).collect();
            let mut bridge = ProgressBridge::new(progress, segment_lengths);
            let result = flasher.write_bins_to_flash(&segments, &mut bridge);
            (flasher, result)
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))?;

        self.flasher = Some(flasher);
        result.map_err(|e| DriverError::Write(e.to_string()))
    }
}
