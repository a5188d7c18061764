use crate::error::DecodeError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Which path delivered a reading. Recorded for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Push,
    Poll,
}

/// A single accepted sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub device: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Tank level in percent
    pub water_level: Option<f64>,
    /// Celsius
    pub temperature: Option<f64>,
    /// Amperes drawn by the pump
    pub current: Option<f64>,
    /// L/min
    pub flow_rate: Option<f64>,
    /// Vibration magnitude in G
    pub vibration: Option<f64>,
    pub pump_running: Option<bool>,
    /// Percent
    pub efficiency: Option<f64>,
}

impl SensorSnapshot {
    /// Empty reading at `timestamp`, mostly useful for building test data.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            device: None,
            timestamp,
            water_level: None,
            temperature: None,
            current: None,
            flow_rate: None,
            vibration: None,
            pump_running: None,
            efficiency: None,
        }
    }
}

/// Timestamps arrive either as RFC 3339 text or as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(f64),
    Text(String),
}

impl WireTimestamp {
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) if ms.is_finite() => {
                Utc.timestamp_millis_opt(*ms as i64).single()
            }
            WireTimestamp::Millis(_) => None,
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

/// Sensor reading as it appears on the wire, both in `sensorData` frames and
/// in the latest-reading poll response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorPayload {
    pub device: Option<String>,
    pub timestamp: Option<WireTimestamp>,
    #[serde(alias = "level")]
    pub water_level: Option<f64>,
    pub temperature: Option<f64>,
    pub current: Option<f64>,
    pub flow_rate: Option<f64>,
    pub vibration: Option<f64>,
    pub vibration_x: Option<f64>,
    pub vibration_y: Option<f64>,
    pub vibration_z: Option<f64>,
    #[serde(alias = "pumpStatus")]
    pub pump: Option<bool>,
    pub efficiency: Option<f64>,
}

const SENSOR_KIND: &str = "sensorData";

impl SensorPayload {
    /// Validate the payload and turn it into a snapshot. A missing timestamp
    /// is replaced by `received`.
    pub fn into_snapshot(self, received: DateTime<Utc>) -> Result<SensorSnapshot, DecodeError> {
        let timestamp = match &self.timestamp {
            Some(raw) => raw
                .resolve()
                .ok_or_else(|| DecodeError::invalid(SENSOR_KIND, "unparseable timestamp"))?,
            None => received,
        };

        let vibration = match self.vibration {
            Some(magnitude) => Some(magnitude),
            None => vibration_magnitude(self.vibration_x, self.vibration_y, self.vibration_z),
        };

        let measurements = [
            ("waterLevel", self.water_level),
            ("temperature", self.temperature),
            ("current", self.current),
            ("flowRate", self.flow_rate),
            ("vibration", vibration),
            ("efficiency", self.efficiency),
        ];
        for (name, value) in measurements {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(DecodeError::invalid(
                        SENSOR_KIND,
                        format!("{name} is not a finite number"),
                    ));
                }
            }
        }
        check_percent("waterLevel", self.water_level)?;
        check_percent("efficiency", self.efficiency)?;

        let has_measurement =
            measurements.iter().any(|(_, v)| v.is_some()) || self.pump.is_some();
        if !has_measurement {
            return Err(DecodeError::invalid(SENSOR_KIND, "no measurements present"));
        }

        Ok(SensorSnapshot {
            device: self.device,
            timestamp,
            water_level: self.water_level,
            temperature: self.temperature,
            current: self.current,
            flow_rate: self.flow_rate,
            vibration,
            pump_running: self.pump,
            efficiency: self.efficiency,
        })
    }
}

fn check_percent(name: &str, value: Option<f64>) -> Result<(), DecodeError> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(DecodeError::invalid(
            SENSOR_KIND,
            format!("{name} {v} outside 0-100%"),
        )),
        _ => Ok(()),
    }
}

/// Euclidean norm of the three axis readings. Missing axes count as zero, so
/// this is a best-effort figure rather than a calibrated RMS measurement.
/// Returns `None` when no axis is present at all.
pub fn vibration_magnitude(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Option<f64> {
    if x.is_none() && y.is_none() && z.is_none() {
        return None;
    }
    let (x, y, z) = (x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0));
    Some((x * x + y * y + z * z).sqrt())
}
