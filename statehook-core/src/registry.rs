//! Named handlers for declarative definitions.

use crate::context::Context;
use crate::error::EngineError;
use crate::handler::{Action, StateHook, TransitionHook, UnhandledHook};
use crate::state::{StateData, StateId};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Handlers that definition files refer to by name.
///
/// Each handler kind has its own namespace, so `log` can name an action, a
/// state hook and a transition hook at once.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    actions: HashMap<String, Action>,
    state_hooks: HashMap<String, StateHook>,
    transition_hooks: HashMap<String, TransitionHook>,
    unhandled_hooks: HashMap<String, UnhandledHook>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry
            .register_action("log", Action::from_fn(log_action))
            .register_action("echo", Action::from_fn(echo_action));

        registry
            .register_state_hook("log", StateHook::from_fn(log_state))
            .register_state_hook("remember", StateHook::from_fn(remember_payload))
            .register_state_hook("count", StateHook::from_fn(count_visit))
            .register_state_hook(
                "succeed",
                StateHook::new(|_state: StateId, ctx: Context| async move {
                    tokio::task::yield_now().await;
                    Ok(ctx.payload().cloned().unwrap_or(Value::Null))
                }),
            )
            .register_state_hook(
                "fail",
                StateHook::new(|state: StateId, _ctx: Context| async move {
                    tokio::task::yield_now().await;
                    Err::<Value, _>(EngineError::handler(format!("async action failed in '{}'", state)))
                }),
            );

        registry.register_transition_hook("log", TransitionHook::from_fn(log_move));

        registry
            .register_unhandled_hook("ignore", UnhandledHook::from_fn(|_: &Context| Ok(None)))
            .register_unhandled_hook(
                "echo",
                UnhandledHook::from_fn(|ctx: &Context| Ok(ctx.payload().cloned())),
            )
            .register_unhandled_hook(
                "reject",
                UnhandledHook::from_fn(|ctx: &Context| {
                    Err(EngineError::handler(format!(
                        "event '{}' rejected",
                        ctx.event().unwrap_or_default()
                    )))
                }),
            );

        registry
    }

    pub fn register_action(&mut self, name: impl Into<String>, action: Action) -> &mut Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn register_state_hook(&mut self, name: impl Into<String>, hook: StateHook) -> &mut Self {
        self.state_hooks.insert(name.into(), hook);
        self
    }

    pub fn register_transition_hook(
        &mut self,
        name: impl Into<String>,
        hook: TransitionHook,
    ) -> &mut Self {
        self.transition_hooks.insert(name.into(), hook);
        self
    }

    pub fn register_unhandled_hook(
        &mut self,
        name: impl Into<String>,
        hook: UnhandledHook,
    ) -> &mut Self {
        self.unhandled_hooks.insert(name.into(), hook);
        self
    }

    /// Looks up an action. An unknown name yields an action that fails when
    /// called.
    pub fn action(&self, name: &str) -> Action {
        match self.actions.get(name) {
            Some(action) => action.clone(),
            None => {
                warn_missing("action", name);
                let error = missing("action", name);
                Action::from_fn(move |_: &Context| Err(EngineError::handler(&error)))
            }
        }
    }

    pub fn state_hook(&self, name: &str) -> StateHook {
        match self.state_hooks.get(name) {
            Some(hook) => hook.clone(),
            None => {
                warn_missing("state hook", name);
                let error = missing("state hook", name);
                StateHook::from_fn(move |_: &StateId, _: &Context| Err(EngineError::handler(&error)))
            }
        }
    }

    pub fn transition_hook(&self, name: &str) -> TransitionHook {
        match self.transition_hooks.get(name) {
            Some(hook) => hook.clone(),
            None => {
                warn_missing("transition hook", name);
                let error = missing("transition hook", name);
                TransitionHook::from_fn(move |_: &StateId, _: &StateId, _: &Context| {
                    Err(EngineError::handler(&error))
                })
            }
        }
    }

    pub fn unhandled_hook(&self, name: &str) -> UnhandledHook {
        match self.unhandled_hooks.get(name) {
            Some(hook) => hook.clone(),
            None => {
                warn_missing("unhandled hook", name);
                let error = missing("unhandled hook", name);
                UnhandledHook::from_fn(move |_: &Context| Err(EngineError::handler(&error)))
            }
        }
    }
}

fn missing(kind: &str, name: &str) -> String {
    format!("no {} registered as '{}'", kind, name)
}

fn warn_missing(kind: &str, name: &str) {
    tracing::warn!("Unknown {} '{}'; it will fail when invoked", kind, name);
}

fn log_action(ctx: &Context) -> Result<Value, EngineError> {
    let payload = ctx.payload().cloned().unwrap_or(Value::Null);
    tracing::info!(
        "[{}] action: event={:?} payload={}",
        ctx.machine().id(),
        ctx.event(),
        payload
    );
    Ok(Value::Null)
}

fn echo_action(ctx: &Context) -> Result<Value, EngineError> {
    Ok(ctx
        .payload()
        .or(ctx.result())
        .cloned()
        .unwrap_or(Value::Null))
}

fn log_state(state: &StateId, ctx: &Context) -> Result<Value, EngineError> {
    tracing::info!(
        "[{}] state '{}': event={:?}",
        ctx.machine().id(),
        state,
        ctx.event()
    );
    Ok(Value::Null)
}

fn remember_payload(state: &StateId, ctx: &Context) -> Result<Value, EngineError> {
    if let Some(payload) = ctx.payload() {
        scratch(state, ctx)?.insert("payload", payload.clone());
    }
    Ok(Value::Null)
}

fn count_visit(state: &StateId, ctx: &Context) -> Result<Value, EngineError> {
    let visits = scratch(state, ctx)?.update(|map| {
        let next = map.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
        map.insert("visits".to_string(), json!(next));
        next
    });
    Ok(json!(visits))
}

fn scratch(state: &StateId, ctx: &Context) -> Result<StateData, EngineError> {
    ctx.machine()
        .state_data(state.as_str())
        .ok_or_else(|| EngineError::UnknownState {
            state: state.to_string(),
        })
}

fn log_move(from: &StateId, to: &StateId, ctx: &Context) -> Result<Value, EngineError> {
    tracing::info!(
        "[{}] '{}' -> '{}' on {:?}",
        ctx.machine().id(),
        from,
        to,
        ctx.event()
    );
    Ok(Value::Null)
}
