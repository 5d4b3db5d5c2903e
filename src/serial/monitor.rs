//! Passive monitor loop and the read lock it shares with the flasher.
//!
//! The monitor drains and discards whatever the device prints while the
//! connection is idle. A [`ReaderSlot`] admits at most one reader at a time;
//! the monitor takes a fresh [`ReadLock`] for each read cycle and the flash
//! orchestrator holds one for the whole flash.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::interface::SerialLink;
use crate::status::{Reporter, SessionEvent};

const READ_CHUNK: usize = 1024;
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Shared admission counter for readers of one physical port
#[derive(Debug, Default)]
pub struct ReaderSlot {
    holders: AtomicUsize,
    peak: AtomicUsize,
    acquisitions: AtomicU64,
}

impl ReaderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    /// Highest number of simultaneous holders ever observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Acquire)
    }
}

/// Exclusive read access; released on drop no matter how the reader ended
#[derive(Debug)]
pub struct ReadLock {
    slot: Arc<ReaderSlot>,
}

impl ReadLock {
    pub fn try_acquire(slot: &Arc<ReaderSlot>) -> Option<Self> {
        slot.holders
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        slot.peak.fetch_max(slot.holders(), Ordering::AcqRel);
        slot.acquisitions.fetch_add(1, Ordering::AcqRel);
        Some(Self { slot: slot.clone() })
    }

    /// Poll for the lock until `wait` elapses
    pub async fn acquire(slot: &Arc<ReaderSlot>, wait: Duration) -> Option<Self> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lock) = Self::try_acquire(slot) {
                return Some(lock);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(LOCK_RETRY).await;
        }
    }
}

impl Drop for ReadLock {
    fn drop(&mut self) {
        self.slot.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a running monitor loop. The loop owns the port; the port closes
/// when the loop ends.
pub struct MonitorHandle {
    keep_reading: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn spawn(link: Box<dyn SerialLink>, slot: Arc<ReaderSlot>, reporter: Reporter) -> Self {
        let keep_reading = Arc::new(AtomicBool::new(true));
        let cancel = Arc::new(Notify::new());

        let task = tokio::spawn(monitor_loop(
            link,
            keep_reading.clone(),
            cancel.clone(),
            slot,
            reporter,
        ));

        Self {
            keep_reading,
            cancel,
            task: Some(task),
        }
    }

    pub fn stop_reading(&self) {
        self.keep_reading.store(false, Ordering::Release);
    }

    /// Best-effort unblock of an in-flight read
    pub fn cancel_read(&self) {
        self.cancel.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the loop and give it `grace` to release its lock. A loop that has
    /// not exited by then is aborted. The port is closed on return either way.
    /// Returns whether the loop exited on its own.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.stop_reading();
        self.cancel_read();

        let Some(mut task) = self.task.take() else {
            return true;
        };
        match timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                log::warn!("Monitor loop still reading after {:?}, aborting it", grace);
                task.abort();
                let _ = task.await;
                false
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.keep_reading.store(false, Ordering::Release);
            task.abort();
        }
    }
}

async fn monitor_loop(
    mut link: Box<dyn SerialLink>,
    keep_reading: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    slot: Arc<ReaderSlot>,
    reporter: Reporter,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut readable = true;

    while readable && keep_reading.load(Ordering::Acquire) {
        let Some(_lock) = ReadLock::try_acquire(&slot) else {
            sleep(LOCK_RETRY).await;
            continue;
        };

        while keep_reading.load(Ordering::Acquire) {
            tokio::select! {
                _ = cancel.notified() => {
                    log::debug!("Monitor read cancelled");
                    break;
                }
                result = link.read(&mut buf) => match result {
                    Ok(0) => {
                        log::debug!("Serial stream ended");
                        readable = false;
                        break;
                    }
                    Ok(n) => reporter.emit(SessionEvent::MonitorData { bytes: n }),
                    Err(e) => {
                        // Expected while the port changes hands
                        log::debug!("Monitor read error ignored: {}", e);
                        readable = is_transient(&e);
                        if readable {
                            sleep(LOCK_RETRY).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    log::debug!("Monitor loop exited");
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    )
}
