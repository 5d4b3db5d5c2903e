// Shared fakes for the integration tests. Not every test file uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::broadcast;

use serial_updater_lib::flash::{DriverError, DriverFactory, FlashDriver, ProgressFn, WriteRequest};
use serial_updater_lib::serial::{self, PortOpener, PortSelector, ReaderSlot, SelectionError, SerialError, SerialLink};
use serial_updater_lib::status::SessionEvent;
use serial_updater_lib::update::{Asset, DownloadProgress, FirmwareSource, ReleaseInfo, UpdateError, UpdateResult};
use serial_updater_lib::{Collaborators, UpdaterConfig, UpdaterSession};

pub const PORT: &str = "/dev/ttyUSB0";

pub fn asset(name: &str) -> Asset {
    Asset {
        name: name.to_string(),
        download_url: format!("https://example.com/fw/{}", name),
        size_bytes: 1024,
    }
}

pub fn release_with(names: &[&str]) -> ReleaseInfo {
    ReleaseInfo {
        tag_name: "v1.4.0".to_string(),
        published_at: chrono::Utc::now(),
        html_url: "https://github.com/acme/widget-fw/releases/tag/v1.4.0".to_string(),
        body: String::new(),
        assets: names.iter().map(|name| asset(name)).collect(),
    }
}

pub fn test_config() -> UpdaterConfig {
    UpdaterConfig {
        repo_owner: "acme".to_string(),
        repo_name: "widget-fw".to_string(),
        handoff_grace_ms: 50,
        ..UpdaterConfig::default()
    }
}

/// Release feed and download host in memory
pub struct FakeSource {
    release: Mutex<Result<ReleaseInfo, String>>,
    bytes: Mutex<Vec<u8>>,
    pub release_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub fetched_urls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(release: ReleaseInfo, bytes: Vec<u8>) -> Self {
        Self {
            release: Mutex::new(Ok(release)),
            bytes: Mutex::new(bytes),
            release_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            fetched_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(message: &str) -> Self {
        let source = Self::new(release_with(&[]), Vec::new());
        *source.release.lock().unwrap() = Err(message.to_string());
        source
    }

    pub fn set_bytes(&self, bytes: Vec<u8>) {
        *self.bytes.lock().unwrap() = bytes;
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FirmwareSource for FakeSource {
    async fn latest_release(&self, _owner: &str, _repo: &str) -> UpdateResult<ReleaseInfo> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.release
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| UpdateError::Parse(anyhow::anyhow!(message)))
    }

    async fn fetch_bytes(
        &self,
        url: &str,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> UpdateResult<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_urls.lock().unwrap().push(url.to_string());

        let bytes = self.bytes.lock().unwrap().clone();
        let total = bytes.len() as u64;
        progress(DownloadProgress {
            downloaded_bytes: total,
            total_bytes: total,
            percentage: 100.0,
            speed_bps: 0,
        });
        Ok(bytes)
    }
}

/// Opens in-memory ports. The peer ends stay alive so reads block like an
/// idle device would.
pub struct DuplexOpener {
    peers: Mutex<Vec<DuplexStream>>,
    opens: Mutex<HashMap<String, usize>>,
    fail_from: Option<usize>,
}

impl DuplexOpener {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            opens: Mutex::new(HashMap::new()),
            fail_from: None,
        }
    }

    /// The `n`th open (1-based) and every later one fails
    pub fn failing_from(n: usize) -> Self {
        Self {
            fail_from: Some(n),
            ..Self::new()
        }
    }

    pub fn opens(&self, port_name: &str) -> usize {
        self.opens.lock().unwrap().get(port_name).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().values().sum()
    }
}

impl PortOpener for DuplexOpener {
    fn open(&self, port_name: &str, _baud_rate: u32) -> serial::Result<Box<dyn SerialLink>> {
        let attempt = {
            let mut opens = self.opens.lock().unwrap();
            let count = opens.entry(port_name.to_string()).or_insert(0);
            *count += 1;
            opens.values().sum::<usize>()
        };
        if self.fail_from.is_some_and(|n| attempt >= n) {
            return Err(SerialError::ConnectionFailed("access denied".to_string()));
        }

        let (device_end, host_end) = tokio::io::duplex(256);
        self.peers.lock().unwrap().push(host_end);
        Ok(Box::new(device_end))
    }
}

pub enum SelectorReply {
    Port(String),
    Cancelled,
    NoCandidates,
}

pub struct FakeSelector {
    reply: SelectorReply,
}

impl FakeSelector {
    pub fn port(port_name: &str) -> Self {
        Self {
            reply: SelectorReply::Port(port_name.to_string()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            reply: SelectorReply::Cancelled,
        }
    }

    pub fn no_candidates() -> Self {
        Self {
            reply: SelectorReply::NoCandidates,
        }
    }
}

#[async_trait]
impl PortSelector for FakeSelector {
    async fn select_port(&self) -> Result<String, SelectionError> {
        match &self.reply {
            SelectorReply::Port(port_name) => Ok(port_name.clone()),
            SelectorReply::Cancelled => Err(SelectionError::Cancelled),
            SelectorReply::NoCandidates => Err(SelectionError::NoCandidates),
        }
    }
}

/// Scripted flashing driver
#[derive(Default)]
pub struct FakeDriverFactory {
    pub fail_handshake: bool,
    pub fail_write: bool,
    pub progress: Vec<(usize, usize, usize)>,
    pub write_delay: Option<Duration>,
    pub created: AtomicUsize,
    pub holders_during_write: Arc<AtomicUsize>,
    pub slot: Mutex<Option<Arc<ReaderSlot>>>,
}

impl FakeDriverFactory {
    /// Record read-lock holders of `slot` while writing
    pub fn observe(&self, slot: Arc<ReaderSlot>) {
        *self.slot.lock().unwrap() = Some(slot);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DriverFactory for FakeDriverFactory {
    fn create(&self, _port_name: &str, _baud_rate: u32) -> Box<dyn FlashDriver> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDriver {
            fail_handshake: self.fail_handshake,
            fail_write: self.fail_write,
            progress: self.progress.clone(),
            write_delay: self.write_delay,
            slot: self.slot.lock().unwrap().clone(),
            holders_during_write: self.holders_during_write.clone(),
        })
    }
}

struct FakeDriver {
    fail_handshake: bool,
    fail_write: bool,
    progress: Vec<(usize, usize, usize)>,
    write_delay: Option<Duration>,
    slot: Option<Arc<ReaderSlot>>,
    holders_during_write: Arc<AtomicUsize>,
}

#[async_trait]
impl FlashDriver for FakeDriver {
    async fn handshake(&mut self) -> Result<(), DriverError> {
        if self.fail_handshake {
            return Err(DriverError::Handshake("no response from ROM loader".to_string()));
        }
        Ok(())
    }

    async fn write_flash(&mut self, _request: WriteRequest, progress: ProgressFn) -> Result<(), DriverError> {
        if let Some(slot) = &self.slot {
            self.holders_during_write.fetch_max(slot.holders(), Ordering::SeqCst);
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        for (file_index, written, total) in &self.progress {
            progress(*file_index, *written, *total);
        }
        if self.fail_write {
            return Err(DriverError::Write("flash checksum mismatch".to_string()));
        }
        Ok(())
    }
}

pub struct Harness {
    pub session: Arc<UpdaterSession>,
    pub source: Arc<FakeSource>,
    pub opener: Arc<DuplexOpener>,
    pub driver: Arc<FakeDriverFactory>,
}

impl Harness {
    pub fn new(source: FakeSource, opener: DuplexOpener, selector: FakeSelector, driver: FakeDriverFactory) -> Self {
        let source = Arc::new(source);
        let opener = Arc::new(opener);
        let driver = Arc::new(driver);

        let collaborators = Collaborators {
            source: source.clone(),
            opener: opener.clone(),
            selector: Arc::new(selector),
            driver_factory: driver.clone(),
        };
        let session = Arc::new(UpdaterSession::new(test_config(), collaborators));
        driver.observe(session.connection().reader_slot());

        Self {
            session,
            source,
            opener,
            driver,
        }
    }

    /// Firmware `app.ino.bin` available, port answers, driver succeeds
    pub fn happy(driver: FakeDriverFactory) -> Self {
        Self::new(
            FakeSource::new(
                release_with(&["readme.txt", "app.ino.bin", "other.bin"]),
                vec![0xE9; 4096],
            ),
            DuplexOpener::new(),
            FakeSelector::port(PORT),
            driver,
        )
    }
}

/// Everything queued on `events` right now
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Poll `condition` for up to a second
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
