//! Reconciliation store: the single authoritative copy of the current sensor
//! reading and system configuration, fed by both the live channel and the
//! poll fallback.
//!
//! All mutations go through one mutex and publish a complete
//! [`DashboardView`] before the lock is released, so subscribers never see a
//! half-applied update.

use crate::alerts::{derive_alerts, AlertLog, AlertRecord, Thresholds};
use crate::models::history::insert_bounded;
use crate::models::{ConfigUpdate, HistoryPoint, Origin, SensorSnapshot, SystemConfig};
use crate::supervisor::{ConnectionState, ConnectionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything the presentation layer consumes, as one consistent value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub connection: ConnectionStatus,
    /// Latest reading and config polls
    pub source_healthy: bool,
    /// Last history refresh; kept apart so a slow history endpoint does not
    /// mark live readings offline
    pub history_healthy: bool,
    pub live_silent: bool,
    pub snapshot: Option<SensorSnapshot>,
    pub origin: Option<Origin>,
    pub config: SystemConfig,
    pub alerts: Vec<AlertRecord>,
    pub system_alerts: Vec<AlertRecord>,
    pub history: Vec<HistoryPoint>,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            connection: ConnectionStatus::default(),
            source_healthy: true,
            history_healthy: true,
            live_silent: false,
            snapshot: None,
            origin: None,
            config: SystemConfig::default(),
            alerts: Vec::new(),
            system_alerts: Vec::new(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    /// Age after which the held snapshot may be replaced by any reading
    pub freshness_window: Duration,
    pub thresholds: Thresholds,
    pub history_capacity: usize,
    pub alert_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(30),
            thresholds: Thresholds::default(),
            history_capacity: 49,
            alert_capacity: crate::alerts::MAX_ACTIVE_ALERTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted,
    /// Not newer than the held reading, which is still fresh
    Discarded { held: DateTime<Utc> },
}

struct StoreState {
    view: DashboardView,
    accepted_at: Option<Instant>,
    last_push_at: Option<Instant>,
    system_alerts: AlertLog,
}

pub struct Store {
    settings: StoreSettings,
    state: Mutex<StoreState>,
    publisher: watch::Sender<DashboardView>,
}

impl Store {
    pub fn new(settings: StoreSettings) -> Self {
        let (publisher, _) = watch::channel(DashboardView::default());
        Self {
            settings,
            state: Mutex::new(StoreState {
                view: DashboardView::default(),
                accepted_at: None,
                last_push_at: None,
                system_alerts: AlertLog::new(settings.alert_capacity),
            }),
            publisher,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Accept `snapshot` if it is newer than the held one, or if the held one
    /// has outlived the freshness window. `origin` is recorded only.
    pub fn apply_sensor_update(&self, snapshot: SensorSnapshot, origin: Origin) -> UpdateOutcome {
        let now = Instant::now();
        let mut state = self.lock();

        if let (Some(held), Some(accepted_at)) = (&state.view.snapshot, state.accepted_at) {
            let expired = now.duration_since(accepted_at) >= self.settings.freshness_window;
            if snapshot.timestamp <= held.timestamp && !expired {
                debug!(
                    ?origin,
                    incoming = %snapshot.timestamp,
                    held = %held.timestamp,
                    "discarding reading that is not newer than the current one"
                );
                return UpdateOutcome::Discarded {
                    held: held.timestamp,
                };
            }
        }

        let alerts = derive_alerts(&snapshot, &self.settings.thresholds);
        if let Some(level) = snapshot.water_level {
            insert_bounded(
                &mut state.view.history,
                HistoryPoint {
                    timestamp: snapshot.timestamp,
                    level,
                },
                self.settings.history_capacity,
            );
        }

        state.view.snapshot = Some(snapshot);
        state.view.origin = Some(origin);
        state.view.alerts = alerts;
        state.accepted_at = Some(now);
        self.publish(&state);
        UpdateOutcome::Accepted
    }

    /// Last write wins; there is no ordering information on config updates.
    pub fn apply_config_update(&self, update: ConfigUpdate) -> SystemConfig {
        let mut state = self.lock();
        update.apply_to(&mut state.view.config);
        let config = state.view.config;
        self.publish(&state);
        config
    }

    pub fn push_system_alert(&self, alert: AlertRecord) {
        let mut state = self.lock();
        info!(severity = ?alert.severity, "device alert: {}", alert.message);
        state.system_alerts.push(alert);
        state.view.system_alerts = state.system_alerts.to_vec();
        self.publish(&state);
    }

    /// Replace the backend-tracked device alerts with the backend's current
    /// list, most recent first. Live alerts without an id are kept.
    pub fn replace_system_alerts(&self, alerts: Vec<AlertRecord>) {
        let mut state = self.lock();
        state.system_alerts.replace(alerts);
        let current = state.system_alerts.to_vec();
        if state.view.system_alerts == current {
            return;
        }
        state.view.system_alerts = current;
        self.publish(&state);
    }

    /// Drop an acknowledged alert. Returns whether it was present.
    pub fn remove_system_alert(&self, id: &str) -> bool {
        let mut state = self.lock();
        if !state.system_alerts.remove(id) {
            return false;
        }
        state.view.system_alerts = state.system_alerts.to_vec();
        self.publish(&state);
        true
    }

    /// Replace the level series with a freshly polled one.
    pub fn replace_history(&self, mut points: Vec<HistoryPoint>) {
        points.sort_by_key(|p| p.timestamp);
        let capacity = self.settings.history_capacity;
        if points.len() > capacity {
            points.drain(..points.len() - capacity);
        }
        let mut state = self.lock();
        state.view.history = points;
        self.publish(&state);
    }

    /// Mirror the supervisor's status. Entering Connected restarts the
    /// live-silence clock.
    pub fn set_connection(&self, status: ConnectionStatus) {
        let mut state = self.lock();
        if state.view.connection == status {
            return;
        }
        if status.state == ConnectionState::Connected
            && state.view.connection.state != ConnectionState::Connected
        {
            state.last_push_at = Some(Instant::now());
        }
        if status.state != ConnectionState::Connected {
            state.view.live_silent = false;
        }
        state.view.connection = status;
        self.publish(&state);
    }

    /// Note that a frame arrived on the live channel.
    pub fn record_push_activity(&self) {
        let mut state = self.lock();
        state.last_push_at = Some(Instant::now());
        if state.view.live_silent {
            info!("live channel delivering frames again");
            state.view.live_silent = false;
            self.publish(&state);
        }
    }

    pub fn set_source_health(&self, healthy: bool) {
        let mut state = self.lock();
        if state.view.source_healthy == healthy {
            return;
        }
        if healthy {
            info!("poll source recovered");
        } else {
            warn!("poll source offline; keeping last known reading");
        }
        state.view.source_healthy = healthy;
        self.publish(&state);
    }

    pub fn set_history_health(&self, healthy: bool) {
        let mut state = self.lock();
        if state.view.history_healthy == healthy {
            return;
        }
        if !healthy {
            warn!("history endpoint failing; keeping the previous series");
        }
        state.view.history_healthy = healthy;
        self.publish(&state);
    }

    /// Raise `live_silent` when the channel claims to be connected but no frame
    /// arrived within `threshold`. Returns the flag.
    pub fn check_live_silence(&self, threshold: Duration) -> bool {
        let mut state = self.lock();
        let silent = state.view.connection.state == ConnectionState::Connected
            && state
                .last_push_at
                .map(|at| at.elapsed() >= threshold)
                .unwrap_or(true);
        if silent != state.view.live_silent {
            if silent {
                warn!(
                    threshold_secs = threshold.as_secs(),
                    "live channel reports connected but delivers no frames"
                );
            }
            state.view.live_silent = silent;
            self.publish(&state);
        }
        silent
    }

    pub fn current_snapshot(&self) -> Option<SensorSnapshot> {
        self.lock().view.snapshot.clone()
    }

    pub fn current_config(&self) -> SystemConfig {
        self.lock().view.config
    }

    pub fn current_alerts(&self) -> Vec<AlertRecord> {
        self.lock().view.alerts.clone()
    }

    pub fn view(&self) -> DashboardView {
        self.lock().view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.publisher.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &StoreState) {
        self.publisher.send_replace(state.view.clone());
    }
}
