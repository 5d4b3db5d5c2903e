use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{BoundPort, ConnectionState};
use crate::error::{NotReadyReason, UpdaterError};
use crate::serial::{MonitorHandle, PortOpener, PortSelector, ReadLock, ReaderSlot, SelectionError};
use crate::status::{Reporter, SessionEvent};

/// Exclusive use of the port by the flasher, from handoff until handback.
/// Holds the read lock so the monitor cannot come back early.
#[derive(Debug)]
pub struct PortLease {
    port: BoundPort,
    _read_lock: ReadLock,
}

impl PortLease {
    pub fn port_name(&self) -> &str {
        &self.port.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.port.baud_rate
    }
}

/// Owns the single serial port and arbitrates it between the passive
/// monitor loop and the flashing driver
pub struct ConnectionManager {
    opener: Arc<dyn PortOpener>,
    selector: Arc<dyn PortSelector>,
    baud_rate: u32,
    handoff_grace: Duration,
    reporter: Reporter,
    reader_slot: Arc<ReaderSlot>,
    inner: Mutex<ConnectionInner>,
}

struct ConnectionInner {
    state: ConnectionState,
    port: Option<BoundPort>,
    monitor: Option<MonitorHandle>,
}

impl ConnectionManager {
    pub fn new(
        opener: Arc<dyn PortOpener>,
        selector: Arc<dyn PortSelector>,
        baud_rate: u32,
        handoff_grace: Duration,
        reporter: Reporter,
    ) -> Self {
        Self {
            opener,
            selector,
            baud_rate,
            handoff_grace,
            reporter,
            reader_slot: Arc::new(ReaderSlot::new()),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Unbound,
                port: None,
                monitor: None,
            }),
        }
    }

    /// Ask the operator for a port, open it and start monitoring
    pub async fn acquire(&self) -> Result<BoundPort, UpdaterError> {
        {
            let inner = self.inner.lock().await;
            if matches!(inner.state, ConnectionState::Flashing { .. }) {
                return Err(UpdaterError::NotReady(NotReadyReason::FlashInProgress));
            }
        }

        let port_name = self.selector.select_port().await.map_err(|e| {
            log::debug!("Port selection ended: {}", e);
            UpdaterError::NoPortChosen {
                no_candidates: matches!(e, SelectionError::NoCandidates),
            }
        })?;

        let mut inner = self.inner.lock().await;
        if matches!(inner.state, ConnectionState::Flashing { .. }) {
            return Err(UpdaterError::NotReady(NotReadyReason::FlashInProgress));
        }
        if let Some(previous) = inner.port.clone() {
            self.reporter
                .log(format!("Closing {} before switching ports", previous.port_name));
            self.teardown(&mut inner).await;
        }

        log::info!("Attempting to connect to port: {}", port_name);
        let link = self
            .opener
            .open(&port_name, self.baud_rate)
            .map_err(|e| UpdaterError::PortUnavailable {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        let port = BoundPort::new(port_name.clone(), self.baud_rate);
        inner.monitor = Some(MonitorHandle::spawn(
            link,
            self.reader_slot.clone(),
            self.reporter.clone(),
        ));
        inner.port = Some(port.clone());
        self.set_state(&mut inner, ConnectionState::Monitoring { port_name });

        self.reporter
            .log(format!("Connected to {} at {} baud", port.port_name, port.baud_rate));
        Ok(port)
    }

    /// Stop monitoring and close the port. Safe to call when unbound.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state.clone() {
            ConnectionState::Unbound => {}
            ConnectionState::Flashing { port_name } => {
                log::warn!("Ignoring disconnect of {} while flashing", port_name);
            }
            ConnectionState::Monitoring { port_name } => {
                self.reporter.log(format!("Disconnected from {}", port_name));
                self.teardown(&mut inner).await;
            }
        }
    }

    /// Hand the port to the flasher: stop the monitor, cancel its read, wait
    /// out the grace period and close the device.
    pub async fn begin_handoff(&self) -> Result<PortLease, UpdaterError> {
        let mut inner = self.inner.lock().await;
        let port = match (&inner.state, &inner.port) {
            (ConnectionState::Monitoring { .. }, Some(port)) => port.clone(),
            (ConnectionState::Flashing { .. }, _) => {
                return Err(UpdaterError::NotReady(NotReadyReason::FlashInProgress))
            }
            _ => return Err(UpdaterError::NotReady(NotReadyReason::NoDevice)),
        };

        log::info!("Handing {} over to the flasher", port.port_name);
        if let Some(monitor) = inner.monitor.take() {
            if !monitor.shutdown(self.handoff_grace).await {
                self.reporter.warn(format!(
                    "Monitor on {} did not stop in time and was closed forcibly",
                    port.port_name
                ));
            }
        }

        let Some(read_lock) = ReadLock::acquire(&self.reader_slot, self.handoff_grace).await else {
            inner.port = None;
            self.set_state(&mut inner, ConnectionState::Unbound);
            return Err(UpdaterError::PortUnavailable {
                port: port.port_name,
                reason: "the monitor did not release the port".to_string(),
            });
        };

        self.set_state(
            &mut inner,
            ConnectionState::Flashing {
                port_name: port.port_name.clone(),
            },
        );
        Ok(PortLease {
            port,
            _read_lock: read_lock,
        })
    }

    /// Take the port back after a flash, win or lose. One reopen attempt;
    /// on failure the connection becomes unbound and stays that way.
    pub async fn end_handoff(&self, lease: PortLease) -> Result<(), UpdaterError> {
        let PortLease { port, _read_lock } = lease;
        drop(_read_lock);

        let mut inner = self.inner.lock().await;
        match self.opener.open(&port.port_name, port.baud_rate) {
            Ok(link) => {
                inner.monitor = Some(MonitorHandle::spawn(
                    link,
                    self.reader_slot.clone(),
                    self.reporter.clone(),
                ));
                self.set_state(
                    &mut inner,
                    ConnectionState::Monitoring {
                        port_name: port.port_name.clone(),
                    },
                );
                self.reporter
                    .log(format!("Reconnected to {}, monitoring resumed", port.port_name));
                inner.port = Some(port);
                Ok(())
            }
            Err(e) => {
                inner.monitor = None;
                inner.port = None;
                self.set_state(&mut inner, ConnectionState::Unbound);
                Err(UpdaterError::ReopenFailed {
                    port: port.port_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn bound_port(&self) -> Option<BoundPort> {
        self.inner.lock().await.port.clone()
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner.lock().await.state.is_monitoring()
    }

    /// Whether a monitor loop task is still alive
    pub async fn monitor_running(&self) -> bool {
        self.inner
            .lock()
            .await
            .monitor
            .as_ref()
            .map(|m| m.is_running())
            .unwrap_or(false)
    }

    pub fn reader_slot(&self) -> Arc<ReaderSlot> {
        self.reader_slot.clone()
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    async fn teardown(&self, inner: &mut ConnectionInner) {
        if let Some(monitor) = inner.monitor.take() {
            monitor.shutdown(self.handoff_grace).await;
        }
        inner.port = None;
        self.set_state(inner, ConnectionState::Unbound);
    }

    fn set_state(&self, inner: &mut ConnectionInner, state: ConnectionState) {
        log::debug!("Connection state: {:?} -> {:?}", inner.state, state);
        inner.state = state.clone();
        self.reporter.emit(SessionEvent::Connection(state));
    }
}
