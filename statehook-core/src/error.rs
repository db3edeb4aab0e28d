//! Engine error types.

use crate::context::Context;
use crate::state::CurrentState;
use thiserror::Error;

/// Errors raised by the state machine engine and its handlers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("machine is not started")]
    NotStarted,

    #[error("unhandled event '{event}' in state '{state}'")]
    UnhandledEvent {
        event: String,
        state: CurrentState,
        context: Box<Context>,
    },

    #[error("unknown state: {state}")]
    UnknownState { state: String },

    #[error("handler failed: {message}")]
    Handler { message: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("task scheduler is closed")]
    SchedulerClosed,

    #[error("scheduled task panicked")]
    TaskPanicked,

    #[error("no Tokio runtime available to run background work")]
    NoRuntime,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Builds a handler failure from any displayable message.
    pub fn handler(message: impl Into<String>) -> Self {
        EngineError::Handler {
            message: message.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        EngineError::Config {
            reason: reason.into(),
        }
    }

    /// Returns whether the caller can recover by changing its own behavior
    /// (starting the machine, sending a different event) and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::NotStarted | EngineError::UnhandledEvent { .. }
        )
    }

    /// Returns a stable error code suitable for logs and tooling.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Config { .. } => "CONFIG",
            EngineError::NotStarted => "NOT_STARTED",
            EngineError::UnhandledEvent { .. } => "UNHANDLED_EVENT",
            EngineError::UnknownState { .. } => "UNKNOWN_STATE",
            EngineError::Handler { .. } => "HANDLER_FAILED",
            EngineError::InvalidGuard { .. } => "CONFIG",
            EngineError::SchedulerClosed => "SCHEDULER_CLOSED",
            EngineError::TaskPanicked => "TASK_PANICKED",
            EngineError::NoRuntime => "NO_RUNTIME",
            EngineError::Json(_) | EngineError::Yaml(_) => "BAD_DEFINITION",
            EngineError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::NotStarted.error_code(), "NOT_STARTED");
        assert_eq!(EngineError::handler("boom").error_code(), "HANDLER_FAILED");
        assert_eq!(EngineError::config("bad").error_code(), "CONFIG");
        assert_eq!(EngineError::SchedulerClosed.error_code(), "SCHEDULER_CLOSED");
    }

    #[test]
    fn test_recoverable() {
        assert!(EngineError::NotStarted.is_recoverable());
        assert!(!EngineError::handler("boom").is_recoverable());
        assert!(!EngineError::TaskPanicked.is_recoverable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EngineError::handler("disk full").to_string(),
            "handler failed: disk full"
        );
        assert_eq!(
            EngineError::UnknownState {
                state: "ghost".to_string()
            }
            .to_string(),
            "unknown state: ghost"
        );
    }
}
