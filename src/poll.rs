//! Poll fallback: periodic pulls of the latest reading, the system
//! configuration, the level history and the backend's alert list,
//! independent of the live channel.

use crate::alerts::{AlertRecord, BackendAlert};
use crate::config::{EndpointConfig, PollConfig};
use crate::error::{AppError, Result};
use crate::models::{
    ConfigUpdate, HistoryPayload, HistoryPoint, Origin, SensorPayload, SensorSnapshot,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A pull-based telemetry source.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    async fn poll_latest(&self) -> Result<SensorSnapshot>;

    /// Ordered level readings covering the last `window`.
    async fn poll_history(&self, window: Duration) -> Result<Vec<HistoryPoint>>;

    async fn poll_config(&self) -> Result<ConfigUpdate>;

    /// Unacknowledged system alerts, most recent first.
    async fn poll_alerts(&self) -> Result<Vec<AlertRecord>>;

    async fn acknowledge_alert(&self, id: &str) -> Result<()>;
}

/// HTTP implementation of [`PollSource`] against the telemetry backend.
#[derive(Debug, Clone)]
pub struct HttpPollSource {
    client: reqwest::Client,
    latest_url: String,
    history_url: String,
    config_url: String,
    alerts_url: String,
    acknowledge_url: String,
}

impl HttpPollSource {
    pub fn new(endpoint: &EndpointConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            latest_url: endpoint.http_url(&endpoint.latest_path)?,
            history_url: endpoint.http_url(&endpoint.history_path)?,
            config_url: endpoint.http_url(&endpoint.config_path)?,
            alerts_url: endpoint.http_url(&endpoint.alerts_path)?,
            acknowledge_url: endpoint.http_url(&endpoint.acknowledge_path)?,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Poll(format!("HTTP {}", status)));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    async fn poll_latest(&self) -> Result<SensorSnapshot> {
        let payload: SensorPayload = self.get_json(self.client.get(&self.latest_url)).await?;
        Ok(payload.into_snapshot(Utc::now())?)
    }

    async fn poll_history(&self, window: Duration) -> Result<Vec<HistoryPoint>> {
        let request = self
            .client
            .get(&self.history_url)
            .query(&[("window", window.as_secs())]);
        let payload: Vec<HistoryPayload> = self.get_json(request).await?;
        let total = payload.len();
        let points: Vec<HistoryPoint> = payload
            .into_iter()
            .filter_map(HistoryPayload::into_point)
            .collect();
        if points.len() < total {
            debug!("skipped {} unusable history entries", total - points.len());
        }
        Ok(points)
    }

    async fn poll_config(&self) -> Result<ConfigUpdate> {
        self.get_json(self.client.get(&self.config_url)).await
    }

    async fn poll_alerts(&self) -> Result<Vec<AlertRecord>> {
        let payload: Vec<BackendAlert> = self.get_json(self.client.get(&self.alerts_url)).await?;
        Ok(payload
            .into_iter()
            .filter_map(BackendAlert::into_record)
            .collect())
    }

    async fn acknowledge_alert(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.acknowledge_url.trim_end_matches('/'), id);
        let response = self.client.post(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Poll(format!("acknowledge {id}: HTTP {status}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub history_window: Duration,
    pub history_refresh: Duration,
    pub alerts_refresh: Duration,
    pub live_silence: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            timeout: config.timeout(),
            history_window: config.history_window(),
            history_refresh: config.history_refresh(),
            alerts_refresh: config.alerts_refresh(),
            live_silence: config.live_silence(),
        }
    }
}

/// Drives a [`PollSource`] on a fixed interval and feeds the store.
pub struct Poller {
    source: Arc<dyn PollSource>,
    store: Arc<Store>,
    settings: PollSettings,
}

impl Poller {
    pub fn new(source: Arc<dyn PollSource>, store: Arc<Store>, settings: PollSettings) -> Self {
        Self {
            source,
            store,
            settings,
        }
    }

    /// Run until the task is aborted.
    pub async fn run(self) {
        info!(
            "Poller started (interval: {}s)",
            self.settings.interval.as_secs_f64()
        );

        self.refresh_history().await;
        let mut last_history = Instant::now();
        self.refresh_alerts().await;
        let mut last_alerts = Instant::now();

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await;

            if last_history.elapsed() >= self.settings.history_refresh {
                self.refresh_history().await;
                last_history = Instant::now();
            }

            if last_alerts.elapsed() >= self.settings.alerts_refresh {
                self.refresh_alerts().await;
                last_alerts = Instant::now();
            }
        }
    }

    /// One poll round. Returns whether every request succeeded.
    pub async fn tick(&self) -> bool {
        let mut healthy = true;

        match self.bounded(self.source.poll_latest()).await {
            Ok(snapshot) => {
                self.store.apply_sensor_update(snapshot, Origin::Poll);
            }
            Err(e) => {
                warn!("poll for latest reading failed: {}", e);
                healthy = false;
            }
        }

        match self.bounded(self.source.poll_config()).await {
            Ok(update) => {
                if !update.is_empty() {
                    self.store.apply_config_update(update);
                }
            }
            Err(e) => {
                warn!("poll for system config failed: {}", e);
                healthy = false;
            }
        }

        self.store.set_source_health(healthy);
        self.store.check_live_silence(self.settings.live_silence);
        healthy
    }

    /// Fetch the level history and replace the stored series. Failure keeps
    /// the old series and only touches the history health flag.
    pub async fn refresh_history(&self) -> bool {
        match self
            .bounded(self.source.poll_history(self.settings.history_window))
            .await
        {
            Ok(points) => {
                debug!("history refreshed with {} points", points.len());
                self.store.replace_history(points);
                self.store.set_history_health(true);
                true
            }
            Err(e) => {
                warn!("poll for history failed: {}", e);
                self.store.set_history_health(false);
                false
            }
        }
    }

    /// Fetch the backend's unacknowledged alerts and replace the stored
    /// list. Failure keeps the old list.
    pub async fn refresh_alerts(&self) -> bool {
        match self.bounded(self.source.poll_alerts()).await {
            Ok(alerts) => {
                debug!("alerts refreshed with {} entries", alerts.len());
                self.store.replace_system_alerts(alerts);
                true
            }
            Err(e) => {
                warn!("poll for system alerts failed: {}", e);
                false
            }
        }
    }

    async fn bounded<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.settings.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.settings.timeout.as_millis() as u64)),
        }
    }
}
