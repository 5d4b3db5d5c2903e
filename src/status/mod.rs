pub mod types;

pub use types::*;

use std::sync::{Arc, RwLock};

use chrono::Local;
use tokio::sync::{broadcast, watch};

use crate::error::UpdaterError;

const EVENT_CAPACITY: usize = 256;

/// Session log and current status sink.
///
/// Writers only append to the log or replace the status wholesale, so the
/// reporter can be cloned freely and called from the flashing driver's
/// blocking thread without coordination.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    lines: RwLock<Vec<LogLine>>,
    status_tx: watch::Sender<OperationStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Reporter {
    pub fn new() -> Self {
        let (status_tx, _status_rx) = watch::channel(OperationStatus::default());
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ReporterInner {
                lines: RwLock::new(Vec::new()),
                status_tx,
                events_tx,
            }),
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.append(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(LogLevel::Error, message.into());
    }

    fn append(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warn => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }

        let line = LogLine {
            timestamp: Local::now(),
            level,
            message,
        };
        {
            let mut lines = self.inner.lines.write().unwrap_or_else(|e| e.into_inner());
            lines.push(line.clone());
        }
        self.emit(SessionEvent::Log(line));
    }

    /// Operator-initiated clear; the only way lines ever leave the log
    pub fn clear_log(&self) {
        {
            let mut lines = self.inner.lines.write().unwrap_or_else(|e| e.into_inner());
            lines.clear();
        }
        self.emit(SessionEvent::LogCleared);
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.inner
            .lines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_status(&self, category: StatusCategory, detail: impl Into<String>) {
        let status = OperationStatus::new(category, detail);
        self.inner.status_tx.send_replace(status.clone());
        self.emit(SessionEvent::Status(status));
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<OperationStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Never blocks; events are dropped when nobody listens
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Boundary handling for a failed top-level operation: log it, reflect it
    /// in the status and surface the matching guidance.
    pub fn report_failure(&self, error: &UpdaterError) {
        if error.is_soft() {
            self.warn(error.to_string());
        } else {
            self.error(error.to_string());
        }
        if let Some(category) = error.status_category() {
            self.set_status(category, error.to_string());
        }
        self.emit(SessionEvent::Failure(error.clone()));
        if let Some(guidance) = error.guidance() {
            self.emit(SessionEvent::Guidance(guidance));
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_appends_and_clears() {
        let reporter = Reporter::new();
        reporter.log("first");
        reporter.warn("second");
        let lines = reporter.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[1].level, LogLevel::Warn);

        reporter.clear_log();
        assert!(reporter.lines().is_empty());
        reporter.log("after clear");
        assert_eq!(reporter.lines().len(), 1);
    }

    #[test]
    fn test_status_is_overwritten() {
        let reporter = Reporter::new();
        let rx = reporter.status_receiver();
        reporter.set_status(StatusCategory::Checking, "looking");
        reporter.set_status(StatusCategory::Ready, "v1.2.0");
        assert_eq!(reporter.status().category, StatusCategory::Ready);
        assert_eq!(rx.borrow().detail, "v1.2.0");
    }

    #[test]
    fn test_reopen_failure_keeps_status() {
        let reporter = Reporter::new();
        let mut events = reporter.subscribe();
        reporter.set_status(StatusCategory::Success, "done");
        reporter.report_failure(&UpdaterError::ReopenFailed {
            port: "COM3".into(),
            reason: "access denied".into(),
        });
        assert_eq!(reporter.status().category, StatusCategory::Success);

        let mut saw_guidance = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Guidance(_)) {
                saw_guidance = true;
            }
        }
        assert!(!saw_guidance);
    }
}
