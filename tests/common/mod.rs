//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tank_telemetry::alerts::{AlertKind, AlertRecord, Severity};
use tank_telemetry::models::{ConfigUpdate, HistoryPoint, SensorSnapshot};
use tank_telemetry::poll::PollSource;
use tank_telemetry::ws::{Connector, Link, Peer};
use tank_telemetry::{AppError, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Fail,
    Open,
    /// Never completes
    Hang,
}

/// Replays a script of connection outcomes. Once the script runs out every
/// attempt fails. Opened links hand their far side to the test.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    pub fn new(
        steps: impl IntoIterator<Item = Step>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peer_rx)
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Milliseconds between consecutive attempts.
    pub fn gaps_ms(&self) -> Vec<u64> {
        self.calls()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Link> {
        self.calls.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);
        match step {
            Step::Fail => Err(AppError::Transport("connection refused".to_string())),
            Step::Open => {
                let (link, peer) = Link::pair(16);
                let _ = self.peers.send(peer);
                Ok(link)
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Poll source whose answers the test can change at any time. A missing
/// latest reading means the backend is offline.
#[derive(Default)]
pub struct FakePollSource {
    latest: Mutex<Option<SensorSnapshot>>,
    config: Mutex<ConfigUpdate>,
    history: Mutex<Vec<HistoryPoint>>,
    alerts: Mutex<Vec<AlertRecord>>,
    acknowledged: Mutex<Vec<String>>,
    reject_acknowledge: Mutex<bool>,
}

impl FakePollSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_latest(&self, snapshot: Option<SensorSnapshot>) {
        *self.latest.lock().unwrap() = snapshot;
    }

    pub fn set_config(&self, update: ConfigUpdate) {
        *self.config.lock().unwrap() = update;
    }

    pub fn set_history(&self, points: Vec<HistoryPoint>) {
        *self.history.lock().unwrap() = points;
    }

    pub fn set_alerts(&self, alerts: Vec<AlertRecord>) {
        *self.alerts.lock().unwrap() = alerts;
    }

    /// Make the backend answer acknowledgements with an error.
    pub fn reject_acknowledge(&self, reject: bool) {
        *self.reject_acknowledge.lock().unwrap() = reject;
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl PollSource for FakePollSource {
    async fn poll_latest(&self) -> Result<SensorSnapshot> {
        let latest = self.latest.lock().unwrap().clone();
        latest.ok_or_else(|| AppError::Poll("HTTP 503 Service Unavailable".to_string()))
    }

    async fn poll_history(&self, _window: Duration) -> Result<Vec<HistoryPoint>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn poll_config(&self) -> Result<ConfigUpdate> {
        Ok(*self.config.lock().unwrap())
    }

    async fn poll_alerts(&self) -> Result<Vec<AlertRecord>> {
        Ok(self.alerts.lock().unwrap().clone())
    }

    async fn acknowledge_alert(&self, id: &str) -> Result<()> {
        if *self.reject_acknowledge.lock().unwrap() {
            return Err(AppError::Poll("HTTP 500 Internal Server Error".to_string()));
        }
        self.alerts
            .lock()
            .unwrap()
            .retain(|alert| alert.id.as_deref() != Some(id));
        self.acknowledged.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

pub fn backend_alert(id: &str, message: &str) -> AlertRecord {
    AlertRecord {
        id: Some(id.to_string()),
        kind: AlertKind::System,
        severity: Severity::Critical,
        message: message.to_string(),
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn reading(secs: i64, level: f64) -> SensorSnapshot {
    SensorSnapshot {
        water_level: Some(level),
        ..SensorSnapshot::at(ts(secs))
    }
}

/// A `sensorData` frame for `reading(secs, level)`.
pub fn sensor_frame(secs: i64, level: f64) -> String {
    serde_json::json!({
        "type": "sensorData",
        "data": {
            "timestamp": ts(secs).timestamp_millis(),
            "waterLevel": level,
        }
    })
    .to_string()
}

/// Poll `check` until it holds, sleeping on the (usually paused) clock.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
