use crate::engine::EngineHandle;
use crate::error::Result;
use crate::models::PumpCommand;
use crate::store::DashboardView;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct PumpRequest {
    pub action: PumpCommand,
}

#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub status: &'static str,
}

impl Accepted {
    fn new() -> Self {
        Self { status: "accepted" }
    }
}

/// Health check endpoint handler
/// Returns "OK" with 200 status code
pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_state(State(engine): State<EngineHandle>) -> Json<DashboardView> {
    Json(engine.view())
}

/// Queue a pump command on the live channel. The device's answer arrives
/// later as a pumpStatus or systemConfig frame.
pub async fn control_pump(
    State(engine): State<EngineHandle>,
    Json(request): Json<PumpRequest>,
) -> (StatusCode, Json<Accepted>) {
    info!(action = ?request.action, "pump command requested over HTTP");
    engine.send_command(request.action);
    (StatusCode::ACCEPTED, Json(Accepted::new()))
}

pub async fn reconnect(State(engine): State<EngineHandle>) -> (StatusCode, Json<Accepted>) {
    engine.reconnect();
    (StatusCode::ACCEPTED, Json(Accepted::new()))
}

/// Acknowledge a device alert with the backend. 204 once the backend
/// accepts it; backend failures come back as 502 or 504.
pub async fn acknowledge_alert(
    State(engine): State<EngineHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    engine.acknowledge_alert(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
