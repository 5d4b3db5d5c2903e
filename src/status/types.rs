use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::device::ConnectionState;
use crate::error::UpdaterError;
use crate::flash::{FlashPhase, FlashProgress};
use crate::update::DownloadProgress;

/// Current-status categories. Display text and colour derive from this alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCategory {
    Idle,
    Checking,
    Downloading,
    Ready,
    Connecting,
    Flashing { percent: u8 },
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Neutral,
    Info,
    Success,
    Error,
}

impl StatusCategory {
    pub fn label(&self) -> String {
        match self {
            StatusCategory::Idle => "Idle".to_string(),
            StatusCategory::Checking => "Checking for firmware".to_string(),
            StatusCategory::Downloading => "Downloading".to_string(),
            StatusCategory::Ready => "Ready".to_string(),
            StatusCategory::Connecting => "Connecting".to_string(),
            StatusCategory::Flashing { percent } => format!("Flashing {}%", percent),
            StatusCategory::Success => "Done".to_string(),
            StatusCategory::Error => "Error".to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StatusCategory::Idle => Severity::Neutral,
            StatusCategory::Checking
            | StatusCategory::Downloading
            | StatusCategory::Connecting
            | StatusCategory::Flashing { .. } => Severity::Info,
            StatusCategory::Ready | StatusCategory::Success => Severity::Success,
            StatusCategory::Error => Severity::Error,
        }
    }
}

impl Severity {
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Neutral => "#6b7280",
            Severity::Info => "#2563eb",
            Severity::Success => "#16a34a",
            Severity::Error => "#dc2626",
        }
    }
}

/// The single current status. Overwritten, never queued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationStatus {
    pub category: StatusCategory,
    pub detail: String,
    pub updated_at: DateTime<Utc>,
}

impl OperationStatus {
    pub fn new(category: StatusCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn display(&self) -> String {
        if self.detail.is_empty() {
            self.category.label()
        } else {
            format!("{}: {}", self.category.label(), self.detail)
        }
    }

    pub fn color(&self) -> &'static str {
        self.category.severity().color()
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self::new(StatusCategory::Idle, "")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Troubleshooting content matched to the phase that failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Guidance {
    DeviceSelection,
    BootloaderButton,
    NetworkRelay,
}

impl Guidance {
    pub fn title(&self) -> &'static str {
        match self {
            Guidance::DeviceSelection => "Selecting the right serial port",
            Guidance::BootloaderButton => "Entering the bootloader",
            Guidance::NetworkRelay => "Downloading the firmware",
        }
    }

    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            Guidance::DeviceSelection => &[
                "Check the USB cable carries data, not only power.",
                "Install the USB-UART bridge driver (CP210x, CH34x or FTDI) if no port is listed.",
                "Close other programs (serial monitors, IDEs) that may hold the port.",
            ],
            Guidance::BootloaderButton => &[
                "Hold the BOOT button, press and release RESET, then release BOOT.",
                "Start the flash again while the board is in download mode.",
                "Try a shorter cable or another USB port if the handshake keeps timing out.",
            ],
            Guidance::NetworkRelay => &[
                "Check your network connection and retry the download.",
                "Toggle the relay option if direct downloads are blocked.",
                "Make sure the latest release contains a compiled firmware binary.",
            ],
        }
    }
}

/// Everything observers can subscribe to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Log(LogLine),
    LogCleared,
    Status(OperationStatus),
    DownloadProgress(DownloadProgress),
    FlashProgress(FlashProgress),
    Phase(FlashPhase),
    Connection(ConnectionState),
    Guidance(Guidance),
    Failure(UpdaterError),
    MonitorData { bytes: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_derives_from_category() {
        let status = OperationStatus::new(StatusCategory::Flashing { percent: 42 }, "writing");
        assert_eq!(status.display(), "Flashing 42%: writing");
        assert_eq!(status.color(), Severity::Info.color());

        let idle = OperationStatus::default();
        assert_eq!(idle.display(), "Idle");
        assert_eq!(idle.category.severity(), Severity::Neutral);
    }

    #[test]
    fn test_error_is_red() {
        assert_eq!(StatusCategory::Error.severity().color(), "#dc2626");
        assert_eq!(StatusCategory::Success.severity(), Severity::Success);
    }
}
