use serde::{Deserialize, Serialize};

/// Pump configuration as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub pump_on: bool,
    pub auto_mode: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            pump_on: false,
            auto_mode: true,
        }
    }
}

/// Partial update to [`SystemConfig`]. Fields left as `None` keep their value.
///
/// Both `pumpStatus` and the older `pump` key map onto `pump_on`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(rename = "pumpStatus", alias = "pump", default)]
    pub pump_on: Option<bool>,
    #[serde(rename = "pumpAutoMode", default)]
    pub auto_mode: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.pump_on.is_none() && self.auto_mode.is_none()
    }

    pub fn apply_to(&self, config: &mut SystemConfig) {
        if let Some(on) = self.pump_on {
            config.pump_on = on;
        }
        if let Some(auto) = self.auto_mode {
            config.auto_mode = auto;
        }
    }
}

impl From<SystemConfig> for ConfigUpdate {
    fn from(config: SystemConfig) -> Self {
        Self {
            pump_on: Some(config.pump_on),
            auto_mode: Some(config.auto_mode),
        }
    }
}

/// Pump control action sent over the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpCommand {
    On,
    Off,
    Auto,
}
