use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

use crate::config::UpdaterConfig;
use crate::device::{BoundPort, ConnectionManager, ConnectionState};
use crate::error::{NotReadyReason, UpdaterError};
use crate::flash::{DriverFactory, EspflashFactory, FlashOrchestrator, FlashPhase, FlashReport};
use crate::serial::{FixedPortSelector, NativePortOpener, PortOpener, PortSelector, PromptPortSelector};
use crate::status::{Reporter, SessionEvent, StatusCategory};
use crate::update::{BinaryFetcher, FirmwareImage, FirmwareSource, ReleaseInfo, ReleaseResolver, UpdateService};

/// External capabilities the session is built on
pub struct Collaborators {
    pub source: Arc<dyn FirmwareSource>,
    pub opener: Arc<dyn PortOpener>,
    pub selector: Arc<dyn PortSelector>,
    pub driver_factory: Arc<dyn DriverFactory>,
}

impl Collaborators {
    /// GitHub feed, tokio-serial ports and the espflash driver
    pub fn production(config: &UpdaterConfig) -> Self {
        let selector: Arc<dyn PortSelector> = match &config.port {
            Some(port) => Arc::new(FixedPortSelector::new(port.clone())),
            None => Arc::new(PromptPortSelector),
        };
        Self {
            source: Arc::new(UpdateService::new(
                config.github_api_base.clone(),
                config.user_agent.clone(),
            )),
            opener: Arc::new(NativePortOpener),
            selector,
            driver_factory: Arc::new(EspflashFactory),
        }
    }
}

/// All state of one updater session: held release and firmware, the serial
/// connection, the relay toggle and the reporter. Created at start-up and
/// only changed through the methods below.
pub struct UpdaterSession {
    id: Uuid,
    config: UpdaterConfig,
    reporter: Reporter,
    resolver: ReleaseResolver,
    fetcher: BinaryFetcher,
    connection: Arc<ConnectionManager>,
    orchestrator: FlashOrchestrator,
    release: RwLock<Option<Arc<ReleaseInfo>>>,
    firmware: RwLock<Option<Arc<FirmwareImage>>>,
    use_relay: AtomicBool,
    initialized: OnceCell<()>,
}

impl UpdaterSession {
    pub fn new(config: UpdaterConfig, collaborators: Collaborators) -> Self {
        let reporter = Reporter::new();
        let connection = Arc::new(ConnectionManager::new(
            collaborators.opener,
            collaborators.selector,
            config.baud_rate,
            config.handoff_grace(),
            reporter.clone(),
        ));
        let orchestrator = FlashOrchestrator::new(
            connection.clone(),
            collaborators.driver_factory,
            reporter.clone(),
            config.flash_offset,
        );

        Self {
            id: Uuid::new_v4(),
            resolver: ReleaseResolver::new(collaborators.source.clone(), config.firmware_suffix.clone()),
            fetcher: BinaryFetcher::new(collaborators.source, config.relay_base.clone()),
            use_relay: AtomicBool::new(config.use_relay),
            config,
            reporter,
            connection,
            orchestrator,
            release: RwLock::new(None),
            firmware: RwLock::new(None),
            initialized: OnceCell::new(),
        }
    }

    /// Session start-up: resolve and download the latest firmware. Runs the
    /// resolver exactly once no matter how often it is called.
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async {
                log::info!("Updater session {} started", self.id);
                // Failures are already reported; the operator retries by refreshing
                let _ = self.refresh_firmware().await;
            })
            .await;
    }

    /// Resolve the newest release, pick its firmware binary and download it
    pub async fn refresh_firmware(&self) -> Result<Arc<FirmwareImage>, UpdaterError> {
        let owner = self.config.repo_owner.as_str();
        let repo = self.config.repo_name.as_str();

        self.reporter
            .set_status(StatusCategory::Checking, format!("{}/{}", owner, repo));
        self.reporter.log("Checking for the latest firmware release");

        let release = match self.resolver.resolve_latest(owner, repo).await {
            Ok(release) => Arc::new(release),
            Err(e) => return Err(self.fail(e)),
        };
        self.reporter.log(format!(
            "Latest release {} published {}",
            release.tag_name,
            release.published_at.format("%Y-%m-%d %H:%M UTC")
        ));
        if !release.html_url.is_empty() {
            self.reporter.log(format!("Release notes: {}", release.html_url));
        }
        *self.release.write().await = Some(release.clone());

        let asset = match self.resolver.select_firmware_asset(&release) {
            Ok(asset) => asset,
            Err(e) => return Err(self.fail(e)),
        };
        self.reporter
            .log(format!("Found {} ({} bytes)", asset.name, asset.size_bytes));

        let use_relay = self.relay_enabled();
        self.reporter.set_status(StatusCategory::Downloading, asset.name.clone());
        let events = self.reporter.clone();
        let image = match self
            .fetcher
            .fetch(&asset, use_relay, move |progress| {
                events.emit(SessionEvent::DownloadProgress(progress))
            })
            .await
        {
            Ok(image) => Arc::new(image),
            Err(e) => return Err(self.fail(e)),
        };

        self.reporter.log(format!(
            "Downloaded {} bytes (sha256 {})",
            image.len(),
            image.sha256
        ));
        *self.firmware.write().await = Some(image.clone());
        self.reporter.set_status(
            StatusCategory::Ready,
            format!("Firmware {} ready to flash", release.tag_name),
        );
        Ok(image)
    }

    /// Let the operator pick a port, open it and start monitoring
    pub async fn connect(&self) -> Result<BoundPort, UpdaterError> {
        if self.orchestrator.is_busy() {
            return Err(self.fail(UpdaterError::NotReady(NotReadyReason::FlashInProgress)));
        }
        self.reporter
            .set_status(StatusCategory::Connecting, "Select a serial port");
        match self.connection.acquire().await {
            Ok(port) => {
                if self.firmware().await.is_some() {
                    self.reporter.set_status(
                        StatusCategory::Ready,
                        format!("Connected to {}, ready to flash", port.port_name),
                    );
                } else {
                    self.reporter.set_status(
                        StatusCategory::Idle,
                        format!("Connected to {}", port.port_name),
                    );
                }
                Ok(port)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn disconnect(&self) {
        self.connection.release().await;
        self.reporter.set_status(StatusCategory::Idle, "Disconnected");
    }

    /// Flash the held firmware onto the connected device
    pub async fn flash(&self) -> Result<FlashReport, UpdaterError> {
        let firmware = self.firmware().await;
        self.orchestrator.flash(firmware).await
    }

    pub fn clear_log(&self) {
        self.reporter.clear_log();
    }

    pub fn set_relay(&self, enabled: bool) {
        self.use_relay.store(enabled, Ordering::Release);
        self.reporter.log(if enabled {
            "Downloads will go through the relay"
        } else {
            "Downloads will go direct"
        });
    }

    /// Flip the relay setting, returning the new value
    pub fn toggle_relay(&self) -> bool {
        let enabled = !self.relay_enabled();
        self.set_relay(enabled);
        enabled
    }

    pub fn relay_enabled(&self) -> bool {
        self.use_relay.load(Ordering::Acquire)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.connection.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub fn flash_phase(&self) -> FlashPhase {
        self.orchestrator.phase()
    }

    pub async fn release(&self) -> Option<Arc<ReleaseInfo>> {
        self.release.read().await.clone()
    }

    pub async fn firmware(&self) -> Option<Arc<FirmwareImage>> {
        self.firmware.read().await.clone()
    }

    /// Close the port at session end
    pub async fn shutdown(&self) {
        self.connection.release().await;
        log::info!("Updater session {} ended", self.id);
    }

    fn fail(&self, error: UpdaterError) -> UpdaterError {
        self.reporter.report_failure(&error);
        error
    }
}
