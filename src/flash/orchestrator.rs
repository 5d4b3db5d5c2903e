use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::driver::{DriverFactory, ProgressFn, WriteRequest};
use super::progress::ProgressTracker;
use crate::device::ConnectionManager;
use crate::error::{ErrorKind, NotReadyReason, UpdaterError};
use crate::status::{Reporter, SessionEvent, StatusCategory};
use crate::update::FirmwareImage;

pub const SUCCESS_MESSAGE: &str =
    "Done! Please press the RESET button on the device to start the new firmware.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlashPhase {
    Idle,
    PreparingHandoff,
    AwaitingBootloader,
    Writing,
    Finalizing,
    Success,
    Failed(ErrorKind),
}

/// Summary of a successful flash
#[derive(Debug, Clone, Serialize)]
pub struct FlashReport {
    pub attempt_id: Uuid,
    pub bytes_written: usize,
    pub elapsed: Duration,
    /// Set when the port could not be reopened afterwards
    pub reopen_warning: Option<UpdaterError>,
}

/// Sequences handoff, bootloader handshake, write and handback
pub struct FlashOrchestrator {
    connection: Arc<ConnectionManager>,
    factory: Arc<dyn DriverFactory>,
    reporter: Reporter,
    flash_offset: u32,
    phase_tx: watch::Sender<FlashPhase>,
    busy: Mutex<()>,
}

impl FlashOrchestrator {
    pub fn new(
        connection: Arc<ConnectionManager>,
        factory: Arc<dyn DriverFactory>,
        reporter: Reporter,
        flash_offset: u32,
    ) -> Self {
        let (phase_tx, _phase_rx) = watch::channel(FlashPhase::Idle);
        Self {
            connection,
            factory,
            reporter,
            flash_offset,
            phase_tx,
            busy: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> FlashPhase {
        *self.phase_tx.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<FlashPhase> {
        self.phase_tx.subscribe()
    }

    /// Whether a flash attempt is running right now
    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    /// Flash `firmware` onto the monitored device. Every failure is reported
    /// here; the caller only needs the returned value.
    pub async fn flash(&self, firmware: Option<Arc<FirmwareImage>>) -> Result<FlashReport, UpdaterError> {
        let Ok(_busy) = self.busy.try_lock() else {
            return Err(self.refuse(NotReadyReason::FlashInProgress));
        };
        let Some(image) = firmware else {
            return Err(self.refuse(NotReadyReason::NoFirmware));
        };
        if !self.connection.is_monitoring().await {
            return Err(self.refuse(NotReadyReason::NoDevice));
        }

        let attempt_id = Uuid::new_v4();
        let started = Instant::now();
        self.reporter.log(format!(
            "Flashing {} ({} bytes, sha256 {}) at 0x{:X}",
            image.asset.name,
            image.len(),
            image.sha256,
            self.flash_offset
        ));
        log::debug!("Flash attempt {}", attempt_id);

        self.set_phase(FlashPhase::PreparingHandoff);
        self.reporter
            .set_status(StatusCategory::Connecting, "Releasing serial port");
        let lease = match self.connection.begin_handoff().await {
            Ok(lease) => lease,
            Err(e) => {
                self.set_phase(FlashPhase::Failed(e.kind()));
                self.reporter.report_failure(&e);
                self.set_phase(FlashPhase::Idle);
                return Err(e);
            }
        };

        let result = self
            .run_driver(lease.port_name(), lease.baud_rate(), &image)
            .await;

        self.set_phase(FlashPhase::Finalizing);
        let reopen = self.connection.end_handoff(lease).await;

        let outcome = match result {
            Ok(bytes_written) => {
                self.set_phase(FlashPhase::Success);
                self.reporter.log(format!(
                    "Wrote {} bytes in {:.1}s",
                    bytes_written,
                    started.elapsed().as_secs_f64()
                ));
                self.reporter.set_status(StatusCategory::Success, SUCCESS_MESSAGE);
                Ok(FlashReport {
                    attempt_id,
                    bytes_written,
                    elapsed: started.elapsed(),
                    reopen_warning: reopen.clone().err(),
                })
            }
            Err(e) => {
                self.set_phase(FlashPhase::Failed(e.kind()));
                self.reporter.report_failure(&e);
                Err(e)
            }
        };

        if let Err(warning) = &reopen {
            self.reporter.report_failure(warning);
        }
        self.set_phase(FlashPhase::Idle);
        outcome
    }

    async fn run_driver(
        &self,
        port_name: &str,
        baud_rate: u32,
        image: &FirmwareImage,
    ) -> Result<usize, UpdaterError> {
        self.set_phase(FlashPhase::AwaitingBootloader);
        self.reporter
            .set_status(StatusCategory::Connecting, "Waiting for bootloader");
        self.reporter.log(format!("Connecting to bootloader on {}", port_name));

        let mut driver = self.factory.create(port_name, baud_rate);
        driver
            .handshake()
            .await
            .map_err(|e| UpdaterError::BootloaderHandshakeFailed(e.to_string()))?;

        self.set_phase(FlashPhase::Writing);
        self.reporter.log("Bootloader connected, writing firmware");

        let tracker = Arc::new(ProgressTracker::new(self.reporter.clone()));
        let request = WriteRequest::single(self.flash_offset, image.data.clone());
        let total = request.total_bytes();
        tracker.publish(0, 0, total);

        let progress: ProgressFn = {
            let tracker = tracker.clone();
            Arc::new(move |file_index, written, total| {
                tracker.publish(file_index, written, total);
            })
        };

        driver
            .write_flash(request, progress)
            .await
            .map_err(|e| UpdaterError::WriteFailed(e.to_string()))?;

        Ok(total)
    }

    fn refuse(&self, reason: NotReadyReason) -> UpdaterError {
        let error = UpdaterError::NotReady(reason);
        self.reporter.report_failure(&error);
        error
    }

    fn set_phase(&self, phase: FlashPhase) {
        log::debug!("Flash phase: {:?}", phase);
        self.phase_tx.send_replace(phase);
        self.reporter.emit(SessionEvent::Phase(phase));
    }
}
