use crate::api::handlers;
use crate::api::stream;
use crate::engine::EngineHandle;
use axum::{
    extract::Request,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;

pub fn create_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/state", get(handlers::get_state))
        .route("/api/pump", post(handlers::control_pump))
        .route("/api/reconnect", post(handlers::reconnect))
        .route("/api/alerts/{id}/ack", post(handlers::acknowledge_alert))
        .route("/ws/state", get(stream::ws_state))
        .with_state(engine)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|request: &Request| {
                            tracing::span!(
                                Level::INFO,
                                "http_request",
                                method = %request.method(),
                                uri = %request.uri(),
                            )
                        })
                        .on_request(|_request: &Request, _span: &tracing::Span| {
                            tracing::event!(Level::DEBUG, "received request");
                        })
                        .on_response(|_response: &axum::response::Response, latency: std::time::Duration, _span: &tracing::Span| {
                            tracing::event!(Level::INFO, latency = ?latency, "request completed");
                        })
                        .on_failure(|_error: tower_http::classify::ServerErrorsFailureClass, _latency: std::time::Duration, _span: &tracing::Span| {
                            tracing::event!(Level::ERROR, "request failed");
                        }),
                )
                .layer(CorsLayer::permissive()),
        )
}
