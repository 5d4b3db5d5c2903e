mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serial_updater_lib::device::{ConnectionManager, ConnectionState};
use serial_updater_lib::serial::{PortOpener, PortSelector};
use serial_updater_lib::status::{Guidance, Reporter, SessionEvent, StatusCategory};
use serial_updater_lib::{NotReadyReason, UpdaterError};

fn manager(opener: Arc<DuplexOpener>, selector: FakeSelector) -> ConnectionManager {
    let opener: Arc<dyn PortOpener> = opener;
    let selector: Arc<dyn PortSelector> = Arc::new(selector);
    ConnectionManager::new(opener, selector, 115200, Duration::from_millis(50), Reporter::new())
}

#[tokio::test]
async fn test_handoff_and_resume_keep_single_reader() {
    let opener = Arc::new(DuplexOpener::new());
    let connection = manager(opener.clone(), FakeSelector::port(PORT));
    let slot = connection.reader_slot();

    let port = connection.acquire().await.expect("acquire");
    assert_eq!(port.port_name, PORT);
    assert!(wait_until(|| slot.holders() == 1).await, "monitor holds the read lock");

    for _ in 0..3 {
        let lease = connection.begin_handoff().await.expect("handoff");
        assert_eq!(lease.port_name(), PORT);
        assert!(!connection.monitor_running().await);
        assert_eq!(slot.holders(), 1, "only the lease reads while flashing");
        assert_eq!(
            connection.state().await,
            ConnectionState::Flashing { port_name: PORT.to_string() }
        );

        connection.end_handoff(lease).await.expect("reopen");
        assert!(connection.monitor_running().await);
        assert!(connection.is_monitoring().await);
    }

    assert_eq!(slot.peak(), 1);
    assert_eq!(opener.opens(PORT), 4, "one open plus one reopen per handoff");

    connection.release().await;
    assert_eq!(connection.state().await, ConnectionState::Unbound);
    assert_eq!(slot.holders(), 0);
}

#[tokio::test]
async fn test_port_is_locked_while_flashing() {
    let connection = manager(Arc::new(DuplexOpener::new()), FakeSelector::port(PORT));
    connection.acquire().await.expect("acquire");
    let lease = connection.begin_handoff().await.expect("handoff");

    let err = connection.acquire().await.unwrap_err();
    assert_eq!(err, UpdaterError::NotReady(NotReadyReason::FlashInProgress));

    // Disconnect is ignored mid-flash
    connection.release().await;
    assert!(matches!(connection.state().await, ConnectionState::Flashing { .. }));

    let err = connection.begin_handoff().await.unwrap_err();
    assert_eq!(err, UpdaterError::NotReady(NotReadyReason::FlashInProgress));

    connection.end_handoff(lease).await.expect("reopen");
    connection.release().await;
}

#[tokio::test]
async fn test_handoff_requires_a_bound_port() {
    let connection = manager(Arc::new(DuplexOpener::new()), FakeSelector::port(PORT));
    let err = connection.begin_handoff().await.unwrap_err();
    assert_eq!(err, UpdaterError::NotReady(NotReadyReason::NoDevice));
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let connection = manager(Arc::new(DuplexOpener::new()), FakeSelector::port(PORT));
    connection.release().await;
    connection.acquire().await.expect("acquire");
    connection.release().await;
    connection.release().await;
    assert_eq!(connection.state().await, ConnectionState::Unbound);
    assert!(connection.bound_port().await.is_none());
}

#[tokio::test]
async fn test_reconnect_closes_previous_port() {
    let opener = Arc::new(DuplexOpener::new());
    let connection = manager(opener.clone(), FakeSelector::port(PORT));
    let slot = connection.reader_slot();

    connection.acquire().await.expect("first acquire");
    connection.acquire().await.expect("second acquire");
    assert_eq!(opener.opens(PORT), 2);
    assert!(wait_until(|| slot.holders() == 1).await);
    assert_eq!(slot.peak(), 1);
    connection.release().await;
}

#[tokio::test]
async fn test_open_failure_leaves_unbound() {
    let connection = manager(Arc::new(DuplexOpener::failing_from(1)), FakeSelector::port(PORT));
    let err = connection.acquire().await.unwrap_err();
    assert!(matches!(err, UpdaterError::PortUnavailable { .. }), "got {:?}", err);
    assert_eq!(connection.state().await, ConnectionState::Unbound);
}

#[tokio::test]
async fn test_cancelled_prompt_opens_no_guidance() {
    let h = Harness::new(
        FakeSource::new(release_with(&["app.ino.bin"]), vec![1]),
        DuplexOpener::new(),
        FakeSelector::cancelled(),
        FakeDriverFactory::default(),
    );
    let mut events = h.session.reporter().subscribe();

    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err, UpdaterError::NoPortChosen { no_candidates: false });
    assert_eq!(h.session.connection_state().await, ConnectionState::Unbound);
    assert_eq!(h.opener.total_opens(), 0);
    assert_eq!(h.session.reporter().status().category, StatusCategory::Idle);
    assert!(h
        .session
        .reporter()
        .lines()
        .iter()
        .any(|line| line.message.contains("No serial port chosen")));

    let events = drain(&mut events);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Guidance(_))));
}

#[tokio::test]
async fn test_no_candidates_points_at_device_selection() {
    let h = Harness::new(
        FakeSource::new(release_with(&["app.ino.bin"]), vec![1]),
        DuplexOpener::new(),
        FakeSelector::no_candidates(),
        FakeDriverFactory::default(),
    );
    let mut events = h.session.reporter().subscribe();

    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err, UpdaterError::NoPortChosen { no_candidates: true });
    assert_eq!(h.session.reporter().status().category, StatusCategory::Error);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Guidance(Guidance::DeviceSelection))));
}

#[tokio::test]
async fn test_event_stream_drains_then_closes_when_session_ends() {
    let h = Harness::happy(FakeDriverFactory::default());
    let mut events = h.session.reporter().subscribe();

    h.session.connect().await.expect("connect");
    h.session.shutdown().await;
    drop(h);

    // Everything queued before the session ended is still delivered
    let mut saw_disconnect = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(SessionEvent::Log(line))) if line.message.starts_with("Disconnected from") => {
                saw_disconnect = true;
            }
            Ok(Ok(_)) => {}
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
            Ok(Err(e)) => panic!("unexpected receive error: {:?}", e),
            Err(_) => panic!("event stream stayed open after the session ended"),
        }
    }
    assert!(saw_disconnect);
}
