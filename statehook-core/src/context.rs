//! Per-dispatch context handed to hooks, conditions and actions.

use crate::engine::Machine;
use crate::error::EngineError;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Value passed to every handler invocation.
///
/// A context is built fresh for each dispatch (event, timer fire, async
/// completion, start/stop) and carries the owning machine explicitly.
#[derive(Clone)]
pub struct Context {
    machine: Machine,
    event: Option<String>,
    payload: Option<Value>,
    result: Option<Value>,
    error: Option<Arc<EngineError>>,
}

impl Context {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            event: None,
            payload: None,
            result: None,
            error: None,
        }
    }

    /// The machine this dispatch belongs to.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Result of the async action whose success triggered this dispatch.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Error of the async action whose failure triggered this dispatch.
    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_deref()
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: EngineError) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    /// JSON view used by guard expressions.
    ///
    /// `state` and `data` reflect the machine at the time of the call.
    pub fn to_value(&self) -> Value {
        let state = self.machine.current_state();
        let data = self
            .machine
            .current_state_data()
            .map(|d| d.snapshot())
            .unwrap_or(Value::Null);

        json!({
            "event": self.event,
            "payload": self.payload,
            "result": self.result,
            "error": self.error.as_ref().map(|e| e.to_string()),
            "state": state.active().map(|s| s.as_str()),
            "data": data,
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("machine", &self.machine.id())
            .field("event", &self.event)
            .field("payload", &self.payload)
            .field("result", &self.result)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Builds the context for each dispatch.
///
/// Implementations must return a new value on every call.
pub trait ContextFactory: Send + Sync {
    fn build(&self, machine: &Machine) -> Context;
}

/// Factory producing an empty context bound to the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    fn build(&self, machine: &Machine) -> Context {
        Context::new(machine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, StateConfig};

    fn machine() -> Machine {
        Machine::new(Configuration::new("idle").state("idle", StateConfig::new()))
    }

    #[test]
    fn test_builder_methods() {
        let ctx = Context::new(machine())
            .with_event("go")
            .with_payload(Some(json!({"speed": 4})))
            .with_result(json!(42));

        assert_eq!(ctx.event(), Some("go"));
        assert_eq!(ctx.payload(), Some(&json!({"speed": 4})));
        assert_eq!(ctx.result(), Some(&json!(42)));
        assert!(ctx.error().is_none());
    }

    #[test]
    fn test_value_view_of_stopped_machine() {
        let ctx = Context::new(machine())
            .with_event("go")
            .with_error(EngineError::handler("nope"));
        let view = ctx.to_value();

        assert_eq!(view["event"], json!("go"));
        assert_eq!(view["payload"], Value::Null);
        assert_eq!(view["state"], Value::Null);
        assert_eq!(view["error"], json!("handler failed: nope"));
    }

    #[test]
    fn test_default_factory_builds_fresh_contexts() {
        let m = machine();
        let factory = DefaultContextFactory;
        let a = factory.build(&m).with_event("a");
        let b = factory.build(&m);

        assert_eq!(a.event(), Some("a"));
        assert!(b.event().is_none());
        assert_eq!(a.machine().id(), b.machine().id());
    }
}
