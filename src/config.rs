use crate::alerts::Thresholds;
use crate::error::{AppError, Result};
use crate::store::StoreSettings;
use crate::supervisor::Backoff;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub poll: PollConfig,
    pub backoff: Backoff,
    pub thresholds: Thresholds,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the telemetry backend, http(s) or ws(s)
    pub base_url: String,
    pub live_path: String,
    pub latest_path: String,
    pub history_path: String,
    pub config_path: String,
    pub alerts_path: String,
    /// The alert id is appended as a final path segment
    pub acknowledge_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            live_path: "/ws".to_string(),
            latest_path: "/api/mqtt/sensor-data/latest".to_string(),
            history_path: "/api/mqtt/sensor-data/history".to_string(),
            config_path: "/api/system-config".to_string(),
            alerts_path: "/api/system-alerts".to_string(),
            acknowledge_path: "/api/alerts/acknowledge".to_string(),
        }
    }
}

impl EndpointConfig {
    /// WebSocket URL of the live channel.
    pub fn live_url(&self) -> Result<String> {
        let (scheme, rest) = split_scheme(&self.base_url)?;
        let scheme = match scheme {
            "http" | "ws" => "ws",
            _ => "wss",
        };
        Ok(join(&format!("{scheme}://{rest}"), &self.live_path))
    }

    /// HTTP URL for one of the poll paths.
    pub fn http_url(&self, path: &str) -> Result<String> {
        let (scheme, rest) = split_scheme(&self.base_url)?;
        let scheme = match scheme {
            "http" | "ws" => "http",
            _ => "https",
        };
        Ok(join(&format!("{scheme}://{rest}"), path))
    }
}

fn split_scheme(url: &str) -> Result<(&str, &str)> {
    match url.split_once("://") {
        Some((scheme @ ("http" | "https" | "ws" | "wss"), rest)) if !rest.is_empty() => {
            Ok((scheme, rest))
        }
        _ => Err(AppError::Config(format!(
            "endpoint base_url must start with http(s):// or ws(s)://, got `{url}`"
        ))),
    }
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_ms: u64,
    /// How far back the history endpoint is asked to look
    pub history_window_secs: u64,
    pub history_refresh_secs: u64,
    pub alerts_refresh_secs: u64,
    /// Defaults to three poll intervals
    pub live_silence_secs: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_ms: 4000,
            history_window_secs: 6 * 60 * 60,
            history_refresh_secs: 60,
            alerts_refresh_secs: 30,
            live_silence_secs: None,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    pub fn history_refresh(&self) -> Duration {
        Duration::from_secs(self.history_refresh_secs)
    }

    pub fn alerts_refresh(&self) -> Duration {
        Duration::from_secs(self.alerts_refresh_secs)
    }

    pub fn live_silence(&self) -> Duration {
        Duration::from_secs(
            self.live_silence_secs
                .unwrap_or(self.interval_secs.saturating_mul(3)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub freshness_window_secs: u64,
    pub history_capacity: usize,
    pub alert_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 30,
            history_capacity: 49,
            alert_capacity: crate::alerts::MAX_ACTIVE_ALERTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        // Expand environment variables in the format $(VAR_NAME)
        let expanded = expand_env_vars(&content)?;

        let mut config: Config = serde_yaml::from_str(&expanded)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file means built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        warn!("Config file {} not found, using defaults", path.display());
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables that win over the file
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(base) = std::env::var("TANK_ENDPOINT_BASE") {
            self.endpoint.base_url = base;
        }
        if let Some(secs) = env_number("TANK_POLL_INTERVAL_SECS")? {
            self.poll.interval_secs = secs;
        }
        if let Some(max) = env_number("TANK_BACKOFF_MAX_ATTEMPTS")? {
            self.backoff.max_attempts = max;
        }
        if let Some(port) = env_number("TANK_SERVER_PORT")? {
            self.server.port = port;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(AppError::Config(
                "endpoint base_url cannot be empty".to_string(),
            ));
        }
        split_scheme(&self.endpoint.base_url)?;

        if self.poll.interval_secs == 0 {
            return Err(AppError::Config(
                "poll interval_secs cannot be 0".to_string(),
            ));
        }

        if self.poll.timeout_ms == 0 {
            return Err(AppError::Config("poll timeout_ms cannot be 0".to_string()));
        }

        if self.backoff.base_ms == 0 {
            return Err(AppError::Config("backoff base_ms cannot be 0".to_string()));
        }

        if self.backoff.cap_ms < self.backoff.base_ms {
            return Err(AppError::Config(
                "backoff cap_ms must be at least base_ms".to_string(),
            ));
        }

        if self.backoff.connect_timeout_ms == 0 {
            return Err(AppError::Config(
                "backoff connect_timeout_ms cannot be 0".to_string(),
            ));
        }

        if self.store.freshness_window_secs == 0 {
            return Err(AppError::Config(
                "store freshness_window_secs cannot be 0".to_string(),
            ));
        }

        if self.store.history_capacity == 0 || self.store.alert_capacity == 0 {
            return Err(AppError::Config(
                "store capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            freshness_window: Duration::from_secs(self.store.freshness_window_secs),
            thresholds: self.thresholds,
            history_capacity: self.store.history_capacity,
            alert_capacity: self.store.alert_capacity,
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{name} must be a number, got `{raw}`"))),
        Err(_) => Ok(None),
    }
}

/// Expand environment variables in the format $(VAR_NAME)
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();

    let re = regex::Regex::new(r"\$\(([A-Z_][A-Z0-9_]*)\)")
        .map_err(|e| AppError::Internal(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    Ok(result)
}
