use crate::alerts::{AlertRecord, SystemAlertPayload};
use crate::error::{DecodeError, Result};
use crate::models::{ConfigUpdate, PumpCommand, SensorPayload, SensorSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed frame received on the live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SensorData(SensorSnapshot),
    PumpStatus(ConfigUpdate),
    SystemAlert(AlertRecord),
    SystemConfig(ConfigUpdate),
    /// Transport keep-alive, never forwarded
    Ping,
    Hello { ts: Option<i64> },
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::SensorData(_) => "sensorData",
            Inbound::PumpStatus(_) => "pumpStatus",
            Inbound::SystemAlert(_) => "systemAlert",
            Inbound::SystemConfig(_) => "systemConfig",
            Inbound::Ping => "ping",
            Inbound::Hello { .. } => "hello",
        }
    }
}

/// Frames sent from this client to the telemetry server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Hello { ts: i64 },
    ControlPump { action: PumpCommand },
}

impl ClientFrame {
    pub fn hello() -> Self {
        ClientFrame::Hello {
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn control_pump(action: PumpCommand) -> Self {
        ClientFrame::ControlPump { action }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode a raw text frame, stamping payloads without a timestamp with now.
pub fn decode(raw: &str) -> std::result::Result<Inbound, DecodeError> {
    decode_at(raw, Utc::now())
}

pub fn decode_at(raw: &str, received: DateTime<Utc>) -> std::result::Result<Inbound, DecodeError> {
    let frame: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match kind {
        "ping" => Ok(Inbound::Ping),
        "hello" => Ok(Inbound::Hello {
            ts: frame.get("ts").and_then(Value::as_i64),
        }),
        "sensorData" => {
            let payload: SensorPayload = payload_of(&frame, "sensorData")?;
            Ok(Inbound::SensorData(payload.into_snapshot(received)?))
        }
        "pumpStatus" => {
            let update: ConfigUpdate = payload_of(&frame, "pumpStatus")?;
            if update.pump_on.is_none() {
                return Err(DecodeError::invalid("pumpStatus", "missing pump flag"));
            }
            Ok(Inbound::PumpStatus(ConfigUpdate {
                auto_mode: None,
                ..update
            }))
        }
        "systemConfig" => {
            let update: ConfigUpdate = payload_of(&frame, "systemConfig")?;
            if update.is_empty() {
                return Err(DecodeError::invalid("systemConfig", "no known fields"));
            }
            Ok(Inbound::SystemConfig(update))
        }
        "systemAlert" => {
            let payload: SystemAlertPayload = payload_of(&frame, "systemAlert")?;
            if payload.message.trim().is_empty() {
                return Err(DecodeError::invalid("systemAlert", "empty message"));
            }
            Ok(Inbound::SystemAlert(payload.into()))
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn payload_of<T>(frame: &Value, kind: &'static str) -> std::result::Result<T, DecodeError>
where
    T: for<'de> Deserialize<'de>,
{
    match frame.get("data") {
        Some(data) if data.is_object() => {
            T::deserialize(data).map_err(|e| DecodeError::invalid(kind, e.to_string()))
        }
        Some(_) => Err(DecodeError::invalid(kind, "`data` is not an object")),
        None => Err(DecodeError::invalid(kind, "missing `data`")),
    }
}
