use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::messenger::Messenger;

/// Outcome code used when the engine is torn down before a response arrives.
pub const ERR_CONNECTION_LOST: &str = "connection-lost";
/// Outcome code used when the handler finishes without a terminal action.
pub const ERR_UNRESOLVED: &str = "unresolved";
/// Outcome code used when the method name is empty.
pub const ERR_BAD_METHOD: &str = "bad-method";

/// A named request with an opaque argument value. Immutable once built.
///
/// Arguments are a [`Value`], so a call carries null, a scalar, an ordered
/// list, or a string-keyed map; the checked accessors below return `None`
/// instead of assuming a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Looks up `key` when the arguments are a string-keyed map.
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.as_object().and_then(|map| map.get(key))
    }

    pub fn arguments_map(&self) -> Option<&Map<String, Value>> {
        self.arguments.as_object()
    }

    pub fn arguments_list(&self) -> Option<&[Value]> {
        self.arguments.as_array().map(Vec::as_slice)
    }
}

/// Terminal outcome of an outbound invocation.
///
/// Per invocation the state machine is `Pending` → exactly one of these;
/// `NotImplemented` means the remote side has no handler for the method name
/// and is a legitimate outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum MethodOutcome {
    Success(Value),
    Error {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    NotImplemented,
}

impl MethodOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MethodOutcome::Success(_))
    }

    fn internal_error(code: &str, message: impl Into<String>) -> Self {
        MethodOutcome::Error {
            code: code.to_string(),
            message: Some(message.into()),
            details: None,
        }
    }
}

/// Receiver-side contract for terminal actions.
///
/// Exactly one of the three may be invoked per instance; a second invocation
/// returns [`ChannelError::AlreadyResolved`] instead of silently resolving
/// twice.
pub trait MethodResult: Send + Sync {
    fn success(&self, value: Value) -> Result<(), ChannelError>;
    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<Value>,
    ) -> Result<(), ChannelError>;
    fn not_implemented(&self) -> Result<(), ChannelError>;
}

/// Handler for inbound calls on a channel.
///
/// The handler may resolve `result` before returning or stash it and resolve
/// later from another task; the caller cannot tell the difference.
#[async_trait]
pub trait MethodCallHandler: Send + Sync {
    async fn on_method_call(&self, call: MethodCall, result: Arc<dyn MethodResult>);
}

/// Adapts a plain closure into a [`MethodCallHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn MethodCallHandler>
where
    F: Fn(MethodCall, Arc<dyn MethodResult>) + Send + Sync + 'static,
{
    struct FnHandler<F>(F);

    #[async_trait]
    impl<F> MethodCallHandler for FnHandler<F>
    where
        F: Fn(MethodCall, Arc<dyn MethodResult>) + Send + Sync + 'static,
    {
        async fn on_method_call(&self, call: MethodCall, result: Arc<dyn MethodResult>) {
            (self.0)(call, result);
        }
    }

    Arc::new(FnHandler(f))
}

/// One-shot responder handed to the active handler. The sender is consumed
/// on first use, so a resolved invocation cannot leave its terminal state.
struct Responder {
    method: String,
    tx: Mutex<Option<oneshot::Sender<MethodOutcome>>>,
}

impl Responder {
    fn new(method: &str, tx: oneshot::Sender<MethodOutcome>) -> Self {
        Self {
            method: method.to_string(),
            tx: Mutex::new(Some(tx)),
        }
    }

    fn resolve(&self, outcome: MethodOutcome) -> Result<(), ChannelError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    // Caller already gave up (teardown or timeout); late
                    // terminal actions are discarded, never re-delivered.
                    debug!(method = %self.method, "discarded late terminal outcome");
                }
                Ok(())
            }
            None => Err(ChannelError::AlreadyResolved),
        }
    }
}

impl MethodResult for Responder {
    fn success(&self, value: Value) -> Result<(), ChannelError> {
        self.resolve(MethodOutcome::Success(value))
    }

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<Value>,
    ) -> Result<(), ChannelError> {
        self.resolve(MethodOutcome::Error {
            code: code.to_string(),
            message: message.map(str::to_string),
            details,
        })
    }

    fn not_implemented(&self) -> Result<(), ChannelError> {
        self.resolve(MethodOutcome::NotImplemented)
    }
}

/// A named conduit bound to one engine's messenger.
///
/// Cheap to clone; clones share the same registration slot on the messenger.
#[derive(Clone)]
pub struct MethodChannel {
    messenger: Arc<Messenger>,
    name: String,
}

impl MethodChannel {
    pub fn new(messenger: Arc<Messenger>, name: impl Into<String>) -> Self {
        Self {
            messenger,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs (or clears, with `None`) the handler for inbound calls on
    /// this channel. Replacement is atomic with respect to concurrent
    /// dispatch: a racing call sees either the old or the new handler, never
    /// neither.
    pub fn set_method_call_handler(&self, handler: Option<Arc<dyn MethodCallHandler>>) {
        self.messenger.set_handler(&self.name, handler);
    }

    /// Invokes `method` and resolves with exactly one terminal outcome.
    ///
    /// Resolution may be synchronous (the handler answers before yielding)
    /// or deferred; either way the future completes exactly once, including
    /// when the handler never answers or the engine is destroyed mid-flight.
    /// Callers wanting a deadline wrap this in `tokio::time::timeout`; a
    /// late real outcome after the timeout is discarded.
    pub async fn invoke(&self, method: &str, arguments: Value) -> MethodOutcome {
        if method.is_empty() {
            return MethodOutcome::internal_error(ERR_BAD_METHOD, "method name must not be empty");
        }
        if !self.messenger.is_alive() {
            return MethodOutcome::internal_error(
                ERR_CONNECTION_LOST,
                format!("channel `{}` is bound to a destroyed engine", self.name),
            );
        }
        let Some(handler) = self.messenger.handler(&self.name) else {
            return MethodOutcome::NotImplemented;
        };

        let (tx, rx) = oneshot::channel();
        let responder: Arc<dyn MethodResult> = Arc::new(Responder::new(method, tx));
        let call = MethodCall::new(method, arguments);

        // The handler runs on its own task so a stuck handler cannot block
        // teardown detection.
        tokio::spawn(async move {
            handler.on_method_call(call, responder).await;
        });

        let mut alive = self.messenger.watch_alive();
        tokio::select! {
            biased;
            outcome = rx => outcome.unwrap_or_else(|_| {
                MethodOutcome::internal_error(
                    ERR_UNRESOLVED,
                    format!("handler on `{}` finished without a terminal outcome", self.name),
                )
            }),
            _ = alive.wait_for(|live| !*live) => {
                MethodOutcome::internal_error(
                    ERR_CONNECTION_LOST,
                    format!("engine destroyed before `{}` resolved", self.name),
                )
            }
        }
    }

    /// Invokes `method` and delivers the outcome to `callback`: exactly one
    /// terminal action, invoked exactly once.
    pub async fn invoke_with(&self, method: &str, arguments: Value, callback: Arc<dyn MethodResult>) {
        let outcome = self.invoke(method, arguments).await;
        let delivered = match outcome {
            MethodOutcome::Success(value) => callback.success(value),
            MethodOutcome::Error {
                code,
                message,
                details,
            } => callback.error(&code, message.as_deref(), details),
            MethodOutcome::NotImplemented => callback.not_implemented(),
        };
        if let Err(err) = delivered {
            warn!(channel = %self.name, method = %method, %err, "result callback rejected terminal outcome");
        }
    }

    /// Fire-and-forget invocation; the outcome is discarded.
    pub fn invoke_method(&self, method: &str, arguments: Value) {
        let channel = self.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            let outcome = channel.invoke(&method, arguments).await;
            debug!(channel = %channel.name, method = %method, ?outcome, "fire-and-forget invocation finished");
        });
    }
}

impl fmt::Debug for MethodChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodChannel")
            .field("name", &self.name)
            .field("messenger", &self.messenger)
            .finish()
    }
}
