use crate::error::DecodeError;
use crate::ws::protocol::{decode, Inbound};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

pub type FrameHandler = Arc<dyn Fn(Inbound) + Send + Sync>;

/// What happened to a single raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Delivered(&'static str),
    KeepAlive,
    NoHandler(&'static str),
    Rejected(DecodeError),
}

/// Decodes inbound frames and hands them to the registered handler.
///
/// There is exactly one handler slot: registering a new handler replaces the
/// previous one, so only the most recently registered consumer sees frames.
/// Fan-out to several observers happens downstream, at the store.
#[derive(Clone, Default)]
pub struct Router {
    handler: Arc<Mutex<Option<FrameHandler>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("replacing registered frame handler");
        }
        *slot = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Decode `raw` and dispatch it. Malformed frames and keep-alives stop
    /// here; nothing in this path can fail the connection.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        let msg = match decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping inbound frame: {}", e);
                debug!("Raw frame: {}", raw);
                return RouteOutcome::Rejected(e);
            }
        };

        if msg == Inbound::Ping {
            trace!("keep-alive ping");
            return RouteOutcome::KeepAlive;
        }

        let kind = msg.kind();
        // Clone out of the lock so a handler may re-register without deadlocking
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => {
                handler(msg);
                RouteOutcome::Delivered(kind)
            }
            None => {
                debug!("no handler registered; dropping {} frame", kind);
                RouteOutcome::NoHandler(kind)
            }
        }
    }
}
