//! Reconnect state machine, driven on a paused clock.

mod common;

use common::{sensor_frame, ScriptedConnector, Step};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tank_telemetry::supervisor::{
    Backoff, ConnectionState, ConnectionStatus, Supervisor, Transition, TRANSITION_BUFFER,
};
use tank_telemetry::ws::{Inbound, LinkEvent, Router};
use tokio::sync::{broadcast, mpsc, oneshot};

const URL: &str = "ws://tank.test/ws";

fn backoff(max_attempts: u32) -> Backoff {
    Backoff {
        base_ms: 1000,
        cap_ms: 15000,
        max_attempts,
        ..Backoff::default()
    }
}

fn spawn(connector: Arc<ScriptedConnector>, max_attempts: u32) -> Supervisor {
    Supervisor::spawn(URL, connector, backoff(max_attempts), Router::new())
}

async fn wait_for(supervisor: &Supervisor, check: impl FnMut(&ConnectionStatus) -> bool) {
    let mut status = supervisor.handle().watch_status();
    status.wait_for(check).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_spacing_then_give_up() {
    let (connector, _peers) = ScriptedConnector::new(Vec::<Step>::new());
    let supervisor = spawn(Arc::clone(&connector), 5);

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.unreachable).await;

    assert_eq!(connector.call_count(), 6);
    assert_eq!(connector.gaps_ms(), vec![1000, 2000, 4000, 8000, 15000]);

    let status = supervisor.handle().status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.attempts, 5);

    // Given up: nothing else happens on its own
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.call_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_after_give_up_starts_over() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Fail, Step::Fail, Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 1);

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.unreachable).await;
    assert_eq!(connector.call_count(), 2);

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;
    assert!(peers.recv().await.is_some());

    let status = supervisor.handle().status();
    assert!(!status.unreachable);
    assert_eq!(status.attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_cancels_retries() {
    let (connector, _peers) = ScriptedConnector::new([Step::Hang]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let handle = supervisor.handle();

    handle.connect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connecting).await;
    handle.disconnect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_count(), 1);
    assert_eq!(handle.status().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_and_retries() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Hang, Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let mut events = supervisor.handle().subscribe();

    supervisor.handle().connect();
    let _peer = peers.recv().await.unwrap();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;

    // Connect timeout of 10 s, then the first backoff delay
    assert_eq!(connector.call_count(), 2);
    assert_eq!(connector.gaps_ms(), vec![11000]);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|t| t.to)
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempts_count_toward_give_up() {
    let (connector, _peers) = ScriptedConnector::new([Step::Hang, Step::Hang, Step::Hang]);
    let supervisor = Supervisor::spawn(
        URL,
        Arc::clone(&connector) as _,
        Backoff {
            connect_timeout_ms: 500,
            ..backoff(2)
        },
        Router::new(),
    );

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.unreachable).await;

    assert_eq!(connector.call_count(), 3);
    assert_eq!(connector.gaps_ms(), vec![1500, 2500]);
    assert_eq!(
        supervisor.handle().status().state,
        ConnectionState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_waiting_cancels_retry() {
    let (connector, _peers) = ScriptedConnector::new([Step::Fail]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let handle = supervisor.handle();

    handle.connect();
    wait_for(&supervisor, |s| s.attempts == 1).await;
    handle.disconnect();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hello_is_first_outbound_frame() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Open]);
    let supervisor = spawn(connector, 10);

    supervisor.handle().connect();
    let mut peer = peers.recv().await.unwrap();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;
    supervisor.handle().send(r#"{"type":"controlPump","action":"on"}"#.to_string());

    let first: serde_json::Value = serde_json::from_str(&peer.sent.recv().await.unwrap()).unwrap();
    assert_eq!(first["type"], "hello");
    assert!(first["ts"].is_i64());

    let second = peer.sent.recv().await.unwrap();
    assert_eq!(second, r#"{"type":"controlPump","action":"on"}"#);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_connect_opens_one_connection() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Open, Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let handle = supervisor.handle();

    handle.connect();
    handle.connect();
    handle.connect();
    let _peer = peers.recv().await.unwrap();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;

    handle.connect();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_transition_is_reported_once_in_order() {
    let (connector, _peers) = ScriptedConnector::new([Step::Fail, Step::Open]);
    let supervisor = spawn(connector, 10);
    let mut events = supervisor.handle().subscribe();

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;

    use ConnectionState::*;
    let mut seen = Vec::new();
    while let Ok(Transition { from, to }) = events.try_recv() {
        seen.push((from, to));
    }
    assert_eq!(
        seen,
        vec![
            (Disconnected, Connecting),
            (Connecting, Disconnected),
            (Disconnected, Connecting),
            (Connecting, Connected),
        ]
    );
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_subscriber_lags_but_status_stays_current() {
    let (connector, _peers) = ScriptedConnector::new(Vec::<Step>::new());
    let supervisor = Supervisor::spawn(
        URL,
        Arc::clone(&connector) as _,
        Backoff {
            base_ms: 1,
            cap_ms: 1,
            max_attempts: 200,
            ..Backoff::default()
        },
        Router::new(),
    );
    let mut events = supervisor.handle().subscribe();

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.unreachable).await;

    // 201 failed attempts, two transitions each, overflow the channel
    assert_eq!(connector.call_count(), 201);
    assert!(TRANSITION_BUFFER < 2 * connector.call_count());
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Lagged(_))
    ));

    // The receiver resumes with the newest retained transition
    let last = std::iter::from_fn(|| events.try_recv().ok()).last();
    assert_eq!(last.map(|t| t.to), Some(ConnectionState::Disconnected));

    let status = supervisor.handle().status();
    assert!(status.unreachable);
    assert_eq!(status.state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_triggers_reconnect_with_reset_counter() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Open, Step::Fail, Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 10);

    supervisor.handle().connect();
    let peer = peers.recv().await.unwrap();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;

    peer.frames
        .send(LinkEvent::Closed(Some("server restart".to_string())))
        .await
        .unwrap();

    let _second = peers.recv().await.unwrap();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;

    assert_eq!(connector.call_count(), 3);
    assert_eq!(connector.gaps_ms().last(), Some(&2000));
    assert_eq!(supervisor.handle().status().attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_passes_through_closing() {
    let (connector, _peers) = ScriptedConnector::new([Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let mut events = supervisor.handle().subscribe();

    supervisor.handle().connect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;
    supervisor.handle().disconnect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Disconnected).await;

    let tail: Vec<ConnectionState> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|t| t.to)
        .collect();
    assert_eq!(
        tail,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
            ConnectionState::Disconnected,
        ]
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_on_connected_runs_after_open() {
    let (connector, _peers) = ScriptedConnector::new([Step::Fail, Step::Open]);
    let supervisor = spawn(connector, 10);
    let (tx, rx) = oneshot::channel();

    supervisor.handle().connect_then(move || {
        let _ = tx.send(());
    });

    rx.await.unwrap();
    assert_eq!(supervisor.handle().status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_frames_reach_router_handler() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Open]);
    let router = Router::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    router.set_handler(move |msg| {
        let _ = tx.send(msg);
    });
    let supervisor = Supervisor::spawn(URL, connector, backoff(10), router);

    supervisor.handle().connect();
    let peer = peers.recv().await.unwrap();
    peer.frames
        .send(LinkEvent::Frame("not json".to_string()))
        .await
        .unwrap();
    peer.frames
        .send(LinkEvent::Frame(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    peer.frames
        .send(LinkEvent::Frame(sensor_frame(0, 42.0)))
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        Inbound::SensorData(snapshot) => assert_eq!(snapshot.water_level, Some(42.0)),
        other => panic!("unexpected frame: {:?}", other),
    }
    // Still connected after the malformed frame
    assert_eq!(supervisor.handle().status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_stops_driver() {
    let (connector, _peers) = ScriptedConnector::new([Step::Open]);
    let supervisor = spawn(Arc::clone(&connector), 10);
    let handle = supervisor.handle();

    handle.connect();
    wait_for(&supervisor, |s| s.state == ConnectionState::Connected).await;
    supervisor.dispose().await;

    handle.connect();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.call_count(), 1);
}
