use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::channel::MethodResult;
use crate::error::ChannelError;

/// Records which terminal action a handler invoked so tests can assert on
/// outcomes without a real transport.
///
/// Misuse is observable from both sides: every attempt is recorded (so the
/// counters expose zero or multiple terminal calls), and any attempt after
/// the first returns [`ChannelError::AlreadyResolved`] to the handler.
#[derive(Debug, Default)]
pub struct CapturingResult {
    state: Mutex<Captured>,
}

#[derive(Debug, Default)]
struct Captured {
    success_value: Option<Value>,
    error: Option<(String, Option<String>, Option<Value>)>,
    success_calls: u32,
    error_calls: u32,
    not_implemented_calls: u32,
}

impl Captured {
    fn terminal_calls(&self) -> u32 {
        self.success_calls + self.error_calls + self.not_implemented_calls
    }
}

impl CapturingResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_success(&self) -> Option<Value> {
        self.lock().success_value.clone()
    }

    pub fn last_error_code(&self) -> Option<String> {
        self.lock().error.as_ref().map(|(code, _, _)| code.clone())
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.lock()
            .error
            .as_ref()
            .and_then(|(_, message, _)| message.clone())
    }

    pub fn last_error_details(&self) -> Option<Value> {
        self.lock()
            .error
            .as_ref()
            .and_then(|(_, _, details)| details.clone())
    }

    pub fn was_success_called(&self) -> bool {
        self.lock().success_calls > 0
    }

    pub fn was_error_called(&self) -> bool {
        self.lock().error_calls > 0
    }

    pub fn was_not_implemented_called(&self) -> bool {
        self.lock().not_implemented_calls > 0
    }

    /// True when success was recorded and no other terminal action was.
    pub fn was_successful(&self) -> bool {
        let state = self.lock();
        state.success_calls > 0 && state.error_calls == 0 && state.not_implemented_calls == 0
    }

    pub fn terminal_calls(&self) -> u32 {
        self.lock().terminal_calls()
    }

    /// The contract every well-behaved invocation must satisfy.
    pub fn resolved_exactly_once(&self) -> bool {
        self.terminal_calls() == 1
    }

    fn record<F>(&self, apply: F) -> Result<(), ChannelError>
    where
        F: FnOnce(&mut Captured),
    {
        let mut state = self.lock();
        let already_resolved = state.terminal_calls() > 0;
        // recorded either way, so misuse stays visible to assertions
        apply(&mut state);
        if already_resolved {
            Err(ChannelError::AlreadyResolved)
        } else {
            Ok(())
        }
    }
}

impl MethodResult for CapturingResult {
    fn success(&self, value: Value) -> Result<(), ChannelError> {
        self.record(|state| {
            state.success_calls += 1;
            state.success_value = Some(value);
        })
    }

    fn error(
        &self,
        code: &str,
        message: Option<&str>,
        details: Option<Value>,
    ) -> Result<(), ChannelError> {
        let code = code.to_string();
        let message = message.map(str::to_string);
        self.record(move |state| {
            state.error_calls += 1;
            state.error = Some((code, message, details));
        })
    }

    fn not_implemented(&self) -> Result<(), ChannelError> {
        self.record(|state| state.not_implemented_calls += 1)
    }
}
