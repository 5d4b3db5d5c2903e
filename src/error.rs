use serde::{Deserialize, Serialize};

use crate::status::{Guidance, StatusCategory};

/// Why a flash request was refused before touching the connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotReadyReason {
    NoFirmware,
    NoDevice,
    FlashInProgress,
}

impl std::fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReadyReason::NoFirmware => write!(f, "No firmware downloaded yet"),
            NotReadyReason::NoDevice => write!(f, "No device connected"),
            NotReadyReason::FlashInProgress => write!(f, "A flash is already in progress"),
        }
    }
}

/// Discriminant of [`UpdaterError`], used where only the category matters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    FeedUnavailable,
    AssetNotFound,
    DownloadFailed,
    NoPortChosen,
    PortUnavailable,
    NotReady,
    BootloaderHandshakeFailed,
    WriteFailed,
    ReopenFailed,
}

/// Operator-facing failures. Every top-level operation returns one of these.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum UpdaterError {
    #[error("Release feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Firmware binary not found: release {tag} has no asset ending in '{suffix}'")]
    AssetNotFound { tag: String, suffix: String },

    #[error("Firmware download failed: {0}")]
    DownloadFailed(String),

    #[error("No serial port chosen")]
    NoPortChosen { no_candidates: bool },

    #[error("Serial port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Not ready to flash: {0}")]
    NotReady(NotReadyReason),

    #[error("Bootloader handshake failed: {0}")]
    BootloaderHandshakeFailed(String),

    #[error("Writing firmware failed: {0}")]
    WriteFailed(String),

    #[error("Could not reopen {port} after flashing: {reason}")]
    ReopenFailed { port: String, reason: String },
}

impl UpdaterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdaterError::FeedUnavailable(_) => ErrorKind::FeedUnavailable,
            UpdaterError::AssetNotFound { .. } => ErrorKind::AssetNotFound,
            UpdaterError::DownloadFailed(_) => ErrorKind::DownloadFailed,
            UpdaterError::NoPortChosen { .. } => ErrorKind::NoPortChosen,
            UpdaterError::PortUnavailable { .. } => ErrorKind::PortUnavailable,
            UpdaterError::NotReady(_) => ErrorKind::NotReady,
            UpdaterError::BootloaderHandshakeFailed(_) => ErrorKind::BootloaderHandshakeFailed,
            UpdaterError::WriteFailed(_) => ErrorKind::WriteFailed,
            UpdaterError::ReopenFailed { .. } => ErrorKind::ReopenFailed,
        }
    }

    /// Soft failures are warnings: they never halt unrelated steps
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            UpdaterError::AssetNotFound { .. } | UpdaterError::ReopenFailed { .. }
        )
    }

    /// Troubleshooting content to surface for this failure, if any.
    ///
    /// A cancelled port prompt opens nothing; only the "no candidate port"
    /// flavour of `NoPortChosen` points the operator at device selection.
    pub fn guidance(&self) -> Option<Guidance> {
        match self {
            UpdaterError::FeedUnavailable(_)
            | UpdaterError::AssetNotFound { .. }
            | UpdaterError::DownloadFailed(_)
            | UpdaterError::NotReady(NotReadyReason::NoFirmware) => Some(Guidance::NetworkRelay),
            UpdaterError::NoPortChosen { no_candidates: true }
            | UpdaterError::PortUnavailable { .. }
            | UpdaterError::NotReady(NotReadyReason::NoDevice) => Some(Guidance::DeviceSelection),
            UpdaterError::BootloaderHandshakeFailed(_) | UpdaterError::WriteFailed(_) => {
                Some(Guidance::BootloaderButton)
            }
            UpdaterError::NoPortChosen { no_candidates: false }
            | UpdaterError::NotReady(NotReadyReason::FlashInProgress)
            | UpdaterError::ReopenFailed { .. } => None,
        }
    }

    /// Status to publish when this error ends an operation. `None` leaves the
    /// current status untouched; a refusal because a flash is running must not
    /// hide that flash's progress.
    pub fn status_category(&self) -> Option<StatusCategory> {
        match self {
            UpdaterError::ReopenFailed { .. }
            | UpdaterError::NotReady(NotReadyReason::FlashInProgress) => None,
            UpdaterError::NoPortChosen { no_candidates: false } => Some(StatusCategory::Idle),
            _ => Some(StatusCategory::Error),
        }
    }
}
