use super::sensor::WireTimestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point of the tank level series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub level: f64,
}

/// History entry as served by the time-series endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPayload {
    pub timestamp: WireTimestamp,
    #[serde(alias = "waterLevel")]
    pub level: f64,
}

impl HistoryPayload {
    /// Drops entries with an unusable timestamp or level.
    pub fn into_point(self) -> Option<HistoryPoint> {
        let timestamp = self.timestamp.resolve()?;
        if !self.level.is_finite() {
            return None;
        }
        Some(HistoryPoint {
            timestamp,
            level: self.level,
        })
    }
}

/// Insert `point` keeping `series` ordered by timestamp, then trim the oldest
/// entries down to `capacity`.
pub fn insert_bounded(series: &mut Vec<HistoryPoint>, point: HistoryPoint, capacity: usize) {
    let idx = series.partition_point(|p| p.timestamp <= point.timestamp);
    series.insert(idx, point);
    if series.len() > capacity {
        let excess = series.len() - capacity;
        series.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(secs: i64, level: f64) -> HistoryPoint {
        HistoryPoint {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            level,
        }
    }

    #[test]
    fn test_insert_keeps_order_and_bound() {
        let mut series = vec![point(10, 1.0), point(30, 3.0)];
        insert_bounded(&mut series, point(20, 2.0), 3);
        assert_eq!(series, vec![point(10, 1.0), point(20, 2.0), point(30, 3.0)]);

        insert_bounded(&mut series, point(40, 4.0), 3);
        assert_eq!(series, vec![point(20, 2.0), point(30, 3.0), point(40, 4.0)]);
    }

    #[test]
    fn test_payload_accepts_water_level_alias() {
        let payload: HistoryPayload =
            serde_json::from_str(r#"{"timestamp": 1000, "waterLevel": 55.0}"#).unwrap();
        assert_eq!(payload.into_point(), Some(point(1, 55.0)));
    }
}
