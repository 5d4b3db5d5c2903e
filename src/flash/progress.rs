use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::status::{Reporter, SessionEvent, StatusCategory};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashProgress {
    pub percent: u8,
    pub file_index: usize,
    pub written_bytes: usize,
    pub total_bytes: usize,
}

/// `round(written / total * 100)`, clamped to 0..=100; 0 when total is 0
pub fn progress_percent(written: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (written as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Publishes driver progress for one flash attempt. Reported percentages
/// never go backwards within the attempt.
pub struct ProgressTracker {
    reporter: Reporter,
    highest: AtomicU8,
}

impl ProgressTracker {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            highest: AtomicU8::new(0),
        }
    }

    /// Driver callback body; only non-blocking sends happen here
    pub fn publish(&self, file_index: usize, written_bytes: usize, total_bytes: usize) -> FlashProgress {
        let computed = progress_percent(written_bytes, total_bytes);
        let percent = self.highest.fetch_max(computed, Ordering::AcqRel).max(computed);

        let progress = FlashProgress {
            percent,
            file_index,
            written_bytes,
            total_bytes,
        };
        self.reporter.set_status(
            StatusCategory::Flashing { percent },
            format!("{} / {} bytes", written_bytes, total_bytes),
        );
        self.reporter.emit(SessionEvent::FlashProgress(progress));
        progress
    }

    pub fn highest(&self) -> u8 {
        self.highest.load(Ordering::Acquire)
    }
}
