use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::channel::MethodCallHandler;

/// Transport-binding capability scoped to a single engine.
///
/// Channels bind to a messenger by name; the messenger routes each inbound
/// invocation to the handler currently registered under that name. When the
/// owning engine is destroyed the liveness signal flips and every in-flight
/// invocation fails over to an error outcome.
pub struct Messenger {
    handlers: DashMap<String, Arc<dyn MethodCallHandler>>,
    alive: watch::Sender<bool>,
}

impl Messenger {
    pub(crate) fn new() -> Self {
        let (alive, _) = watch::channel(true);
        Self {
            handlers: DashMap::new(),
            alive,
        }
    }

    /// Whether the owning engine is still live.
    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    pub(crate) fn watch_alive(&self) -> watch::Receiver<bool> {
        self.alive.subscribe()
    }

    /// Registration is last-writer-wins per channel name. Two channels
    /// sharing one name on the same messenger usually means a naming
    /// collision on the caller side, so replacing a live handler is logged.
    pub(crate) fn set_handler(&self, name: &str, handler: Option<Arc<dyn MethodCallHandler>>) {
        match handler {
            Some(handler) => {
                if self.handlers.insert(name.to_string(), handler).is_some() {
                    warn!(channel = %name, "replaced existing method-call handler");
                } else {
                    debug!(channel = %name, "installed method-call handler");
                }
            }
            None => {
                self.handlers.remove(name);
                debug!(channel = %name, "cleared method-call handler");
            }
        }
    }

    pub(crate) fn handler(&self, name: &str) -> Option<Arc<dyn MethodCallHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Tears the messenger down: flips the liveness signal and drops every
    /// handler registration.
    pub(crate) fn shutdown(&self) {
        self.alive.send_replace(false);
        self.handlers.clear();
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("alive", &self.is_alive())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
