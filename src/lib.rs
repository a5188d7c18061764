pub mod alerts;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod poll;
pub mod store;
pub mod supervisor;
pub mod ws;

// Re-export commonly used items
pub use config::Config;
pub use engine::{Engine, EngineHandle};
pub use error::{AppError, DecodeError, Result};
pub use store::{DashboardView, Store};
pub use supervisor::{ConnectionState, ConnectionStatus};
