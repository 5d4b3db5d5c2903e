//! Operator actions. Each maps onto exactly one session operation and turns
//! the typed error into a message for display.

use serde::Serialize;

use crate::device::{BoundPort, ConnectionState};
use crate::flash::{FlashPhase, FlashReport};
use crate::session::UpdaterSession;
use crate::status::OperationStatus;

/// What the operator sees about the held firmware
#[derive(Debug, Clone, Serialize)]
pub struct FirmwareSummary {
    pub release_tag: Option<String>,
    pub asset_name: String,
    pub size_bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: OperationStatus,
    pub connection: ConnectionState,
    pub phase: FlashPhase,
    pub firmware: Option<FirmwareSummary>,
    pub relay_enabled: bool,
}

/// Connect action
pub async fn connect_device(session: &UpdaterSession) -> Result<BoundPort, String> {
    session
        .connect()
        .await
        .map_err(|e| format!("Failed to connect: {}", e))
}

pub async fn disconnect_device(session: &UpdaterSession) -> Result<(), String> {
    session.disconnect().await;
    Ok(())
}

/// Download-refresh action
pub async fn refresh_firmware(session: &UpdaterSession) -> Result<FirmwareSummary, String> {
    session
        .refresh_firmware()
        .await
        .map_err(|e| format!("Failed to get firmware: {}", e))?;
    firmware_summary(session)
        .await
        .ok_or_else(|| "Firmware download finished but no image is held".to_string())
}

/// Flash action
pub async fn flash_device(session: &UpdaterSession) -> Result<FlashReport, String> {
    session
        .flash()
        .await
        .map_err(|e| format!("Failed to flash firmware: {}", e))
}

/// Log-clear action
pub fn clear_log(session: &UpdaterSession) {
    session.clear_log();
}

/// Relay toggle; returns the new setting
pub fn toggle_relay(session: &UpdaterSession) -> bool {
    session.toggle_relay()
}

pub async fn firmware_summary(session: &UpdaterSession) -> Option<FirmwareSummary> {
    let image = session.firmware().await?;
    let release_tag = session.release().await.map(|r| r.tag_name.clone());
    Some(FirmwareSummary {
        release_tag,
        asset_name: image.asset.name.clone(),
        size_bytes: image.len(),
        sha256: image.sha256.clone(),
    })
}

pub async fn get_session_snapshot(session: &UpdaterSession) -> SessionSnapshot {
    SessionSnapshot {
        status: session.reporter().status(),
        connection: session.connection_state().await,
        phase: session.flash_phase(),
        firmware: firmware_summary(session).await,
        relay_enabled: session.relay_enabled(),
    }
}
