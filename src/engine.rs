//! Wires the connection supervisor, frame router, poller and store into one
//! component with an explicit lifecycle.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Origin, PumpCommand, SystemConfig};
use crate::poll::{HttpPollSource, PollSettings, PollSource, Poller};
use crate::store::{DashboardView, Store};
use crate::supervisor::{ConnectionStatus, Supervisor, SupervisorHandle};
use crate::ws::protocol::{ClientFrame, Inbound};
use crate::ws::router::Router;
use crate::ws::transport::{Connector, WsConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable access to a running engine, used by the state API.
#[derive(Clone)]
pub struct EngineHandle {
    store: Arc<Store>,
    supervisor: SupervisorHandle,
    backend: Arc<dyn PollSource>,
    request_timeout: Duration,
}

impl EngineHandle {
    pub fn connect(&self) {
        self.supervisor.connect();
    }

    pub fn disconnect(&self) {
        self.supervisor.disconnect();
    }

    /// Manual retry, also clears the give-up state.
    pub fn reconnect(&self) {
        info!("manual reconnect requested");
        self.supervisor.connect();
    }

    /// Fire-and-forget pump control. The outcome shows up in later updates.
    pub fn send_command(&self, action: PumpCommand) {
        match ClientFrame::control_pump(action).to_json() {
            Ok(frame) => {
                info!(?action, "sending pump command");
                self.supervisor.send(frame);
            }
            Err(e) => warn!("failed to encode pump command: {}", e),
        }
    }

    /// Acknowledge a device alert with the backend and drop it from the
    /// local list once the backend agrees.
    pub async fn acknowledge_alert(&self, id: &str) -> Result<()> {
        let request = self.backend.acknowledge_alert(id);
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(())) => {
                info!(id, "alert acknowledged");
                self.store.remove_system_alert(id);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(id, "alert acknowledgement failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(id, "alert acknowledgement timed out");
                Err(AppError::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }

    pub fn view(&self) -> DashboardView {
        self.store.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.store.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    pub fn current_config(&self) -> SystemConfig {
        self.store.current_config()
    }
}

/// Owns the background tasks. Dropping the engine aborts them; prefer
/// [`Engine::dispose`] for an orderly shutdown.
pub struct Engine {
    handle: EngineHandle,
    supervisor: Option<Supervisor>,
    poller: Option<JoinHandle<()>>,
    bridge: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build the engine against the real WebSocket and HTTP endpoints.
    pub fn create(config: &Config) -> Result<Self> {
        let poll_source = HttpPollSource::new(&config.endpoint, config.poll.timeout())?;
        Self::with_sources(config, Arc::new(WsConnector::new()), Arc::new(poll_source))
    }

    /// Build the engine with injected transport and poll source.
    pub fn with_sources(
        config: &Config,
        connector: Arc<dyn Connector>,
        poll_source: Arc<dyn PollSource>,
    ) -> Result<Self> {
        let live_url = config.endpoint.live_url()?;
        let store = Arc::new(Store::new(config.store_settings()));

        let router = Router::new();
        let sink = Arc::clone(&store);
        router.set_handler(move |msg| apply_inbound(&sink, msg));

        let supervisor = Supervisor::spawn(live_url, connector, config.backoff, router);
        let supervisor_handle = supervisor.handle();

        let bridge = tokio::spawn(mirror_connection(
            supervisor_handle.watch_status(),
            Arc::clone(&store),
        ));

        let poller = Poller::new(
            Arc::clone(&poll_source),
            Arc::clone(&store),
            PollSettings::from(&config.poll),
        );
        let poller = tokio::spawn(poller.run());

        info!("Telemetry engine created");
        Ok(Self {
            handle: EngineHandle {
                store,
                supervisor: supervisor_handle,
                backend: poll_source,
                request_timeout: config.poll.timeout(),
            },
            supervisor: Some(supervisor),
            poller: Some(poller),
            bridge: Some(bridge),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn connect(&self) {
        self.handle.connect();
    }

    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    pub fn reconnect(&self) {
        self.handle.reconnect();
    }

    pub fn send_command(&self, action: PumpCommand) {
        self.handle.send_command(action);
    }

    pub async fn acknowledge_alert(&self, id: &str) -> Result<()> {
        self.handle.acknowledge_alert(id).await
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.handle.subscribe()
    }

    pub fn view(&self) -> DashboardView {
        self.handle.view()
    }

    /// Stop polling, release the live connection and wait for the
    /// supervisor to finish.
    pub async fn dispose(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.dispose().await;
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
        info!("Telemetry engine disposed");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
        // Supervisor aborts its own task on drop
    }
}

/// Route a decoded frame to the matching store update.
fn apply_inbound(store: &Store, msg: Inbound) {
    store.record_push_activity();
    match msg {
        Inbound::SensorData(snapshot) => {
            store.apply_sensor_update(snapshot, Origin::Push);
        }
        Inbound::PumpStatus(update) | Inbound::SystemConfig(update) => {
            store.apply_config_update(update);
        }
        Inbound::SystemAlert(alert) => store.push_system_alert(alert),
        Inbound::Hello { ts } => debug!(?ts, "server hello"),
        Inbound::Ping => {}
    }
}

async fn mirror_connection(mut status: watch::Receiver<ConnectionStatus>, store: Arc<Store>) {
    loop {
        let current = *status.borrow_and_update();
        store.set_connection(current);
        if status.changed().await.is_err() {
            break;
        }
    }
}
