//! Threshold alerts derived from a sensor snapshot, plus the rolling log of
//! alerts pushed by the device itself.

use crate::models::SensorSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on alerts presented at once.
pub const MAX_ACTIVE_ALERTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "error")]
    Critical,
    Warning,
    Info,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    CriticalLevel,
    LowEfficiency,
    HighCurrent,
    /// Reported by the device through a `systemAlert` frame
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Backend identifier, needed to acknowledge the alert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Percent; below this the level is critical
    pub min_water_level: f64,
    /// Percent
    pub min_efficiency: f64,
    /// Amperes
    pub max_current: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_water_level: 12.0,
            min_efficiency: 50.0,
            max_current: 4.5,
        }
    }
}

/// Evaluate every threshold rule against `snapshot`.
///
/// Rules are independent; results come back in fixed priority order
/// (level, efficiency, current). A rule whose measurement is absent does not
/// fire. The output replaces any previously active set.
pub fn derive_alerts(snapshot: &SensorSnapshot, thresholds: &Thresholds) -> Vec<AlertRecord> {
    let mut alerts = Vec::new();

    if let Some(level) = snapshot.water_level {
        if level < thresholds.min_water_level {
            alerts.push(AlertRecord {
                id: None,
                kind: AlertKind::CriticalLevel,
                severity: Severity::Critical,
                message: format!(
                    "Water level critical: {:.1}% (minimum {:.1}%)",
                    level, thresholds.min_water_level
                ),
            });
        }
    }

    if let Some(efficiency) = snapshot.efficiency {
        if efficiency < thresholds.min_efficiency {
            alerts.push(AlertRecord {
                id: None,
                kind: AlertKind::LowEfficiency,
                severity: Severity::Warning,
                message: format!(
                    "Low pump efficiency: {:.1}% (minimum {:.1}%)",
                    efficiency, thresholds.min_efficiency
                ),
            });
        }
    }

    if let Some(current) = snapshot.current {
        if current > thresholds.max_current {
            alerts.push(AlertRecord {
                id: None,
                kind: AlertKind::HighCurrent,
                severity: Severity::Warning,
                message: format!(
                    "High current draw: {:.2} A (maximum {:.2} A)",
                    current, thresholds.max_current
                ),
            });
        }
    }

    alerts.truncate(MAX_ACTIVE_ALERTS);
    alerts
}

/// Alert ids are numeric or textual depending on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AlertId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertId::Number(n) => write!(f, "{n}"),
            AlertId::Text(s) => f.write_str(s),
        }
    }
}

/// `systemAlert` frame body.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemAlertPayload {
    #[serde(default)]
    pub id: Option<AlertId>,
    #[serde(alias = "title")]
    pub message: String,
    #[serde(rename = "type", default)]
    pub severity: Option<Severity>,
}

impl From<SystemAlertPayload> for AlertRecord {
    fn from(payload: SystemAlertPayload) -> Self {
        AlertRecord {
            id: payload.id.map(|id| id.to_string()),
            kind: AlertKind::System,
            severity: payload.severity.unwrap_or(Severity::Warning),
            message: payload.message,
        }
    }
}

/// One entry of the backend's system alert list.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendAlert {
    pub id: AlertId,
    #[serde(rename = "type", default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl BackendAlert {
    /// `None` for acknowledged alerts and for alerts with no text.
    pub fn into_record(self) -> Option<AlertRecord> {
        if self.acknowledged {
            return None;
        }
        let message = self
            .title
            .into_iter()
            .chain(self.message)
            .find(|text| !text.trim().is_empty())?;
        Some(AlertRecord {
            id: Some(self.id.to_string()),
            kind: AlertKind::System,
            severity: self.severity.unwrap_or(Severity::Warning),
            message,
        })
    }
}

/// Bounded log of device-reported alerts, most recent first.
#[derive(Debug, Clone)]
pub struct AlertLog {
    entries: VecDeque<AlertRecord>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, alert: AlertRecord) {
        self.entries.push_front(alert);
        self.entries.truncate(self.capacity);
    }

    /// Replace every backend-tracked entry with `alerts`, already ordered
    /// most recent first. Pushed alerts without an id stay in front; entries
    /// past the capacity are dropped.
    pub fn replace(&mut self, alerts: Vec<AlertRecord>) {
        let pushed: Vec<AlertRecord> = self
            .entries
            .drain(..)
            .filter(|alert| alert.id.is_none())
            .collect();
        self.entries = pushed
            .into_iter()
            .chain(alerts)
            .take(self.capacity)
            .collect();
    }

    /// Drop the entry with backend id `id`. Returns whether one was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|alert| alert.id.as_deref() != Some(id));
        self.entries.len() != before
    }

    pub fn to_vec(&self) -> Vec<AlertRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
