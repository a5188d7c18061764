pub mod history;
pub mod sensor;
pub mod system;

pub use history::{HistoryPayload, HistoryPoint};
pub use sensor::{vibration_magnitude, Origin, SensorPayload, SensorSnapshot, WireTimestamp};
pub use system::{ConfigUpdate, PumpCommand, SystemConfig};
