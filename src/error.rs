use thiserror::Error;

/// Errors from [`EngineRegistry`](crate::registry::EngineRegistry) operations.
///
/// Lookup misses are not errors; they come back as `None`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("engine identifier must not be empty")]
    EmptyEngineId,
}

/// Errors from operations on an [`Engine`](crate::engine::Engine) handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The handle was invalidated by [`Engine::destroy`](crate::engine::Engine::destroy).
    #[error("engine `{id}` has been destroyed")]
    Destroyed { id: String },
}

/// Errors surfaced to method-call handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A second terminal action was invoked on a result that already
    /// resolved. Exactly one of success/error/not-implemented is allowed
    /// per result instance.
    #[error("terminal result was already resolved")]
    AlreadyResolved,
}
