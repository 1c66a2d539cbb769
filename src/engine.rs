use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::EngineError;
use crate::messenger::Messenger;

/// A long-lived execution context, reusable across attachment points.
///
/// An engine is created directly and typically parked in an
/// [`EngineRegistry`](crate::registry::EngineRegistry) so later attachment
/// points can look it up by id instead of paying for a fresh one.
pub struct Engine {
    id: String,
    messenger: Arc<Messenger>,
    executor_running: AtomicBool,
    destroyed: AtomicBool,
}

impl Engine {
    /// `id` is caller-assigned and is also the registry key by convention.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messenger: Arc::new(Messenger::new()),
            executor_running: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The capability used to bind [`MethodChannel`](crate::channel::MethodChannel)s
    /// to this engine. Fails once the engine is destroyed; operating on a dead
    /// handle is a caller error and is surfaced, never ignored.
    pub fn messenger(&self) -> Result<Arc<Messenger>, EngineError> {
        self.check_live()?;
        Ok(self.messenger.clone())
    }

    /// Marks the executor as running. Idempotent while the engine is live.
    pub fn run_entrypoint(&self) -> Result<(), EngineError> {
        self.check_live()?;
        self.executor_running.store(true, Ordering::SeqCst);
        debug!(engine = %self.id, "executor entrypoint running");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.executor_running.load(Ordering::SeqCst) && !self.is_destroyed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Invalidates the handle. All handler registrations are dropped and
    /// every in-flight invocation on this engine's channels resolves with an
    /// error outcome rather than hanging. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.executor_running.store(false, Ordering::SeqCst);
        self.messenger.shutdown();
        debug!(engine = %self.id, "engine destroyed");
    }

    fn check_live(&self) -> Result<(), EngineError> {
        if self.is_destroyed() {
            Err(EngineError::Destroyed {
                id: self.id.clone(),
            })
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
