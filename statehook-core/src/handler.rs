//! Handler types for hooks, conditions and actions.
//!
//! Every handler takes the dispatch [`Context`] by value and returns a boxed
//! future, so synchronous and asynchronous code plug in the same way.

use crate::context::Context;
use crate::error::EngineError;
use crate::state::StateId;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Result returned by handlers.
pub type HandlerResult<T = Value> = Result<T, EngineError>;

type ConditionFn = dyn Fn(Context) -> BoxFuture<'static, HandlerResult<bool>> + Send + Sync;
type ActionFn = dyn Fn(Context) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type StateHookFn = dyn Fn(StateId, Context) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type TransitionHookFn =
    dyn Fn(StateId, StateId, Context) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type UnhandledHookFn = dyn Fn(Context) -> BoxFuture<'static, HandlerResult<Option<Value>>> + Send + Sync;

/// Guard of a transition. May suspend.
#[derive(Clone)]
pub struct Condition(Arc<ConditionFn>);

impl Condition {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<bool>> + Send + 'static,
    {
        Self(Arc::new(move |ctx: Context| f(ctx).boxed()))
    }

    /// Wraps a synchronous predicate.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx: Context| {
            let matched = f(&ctx);
            async move { Ok(matched) }.boxed()
        }))
    }

    pub(crate) fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult<bool>> {
        (self.0)(ctx)
    }
}

/// Transition action.
#[derive(Clone)]
pub struct Action(Arc<ActionFn>);

impl Action {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |ctx: Context| f(ctx).boxed()))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Context) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx: Context| {
            let out = f(&ctx);
            async move { out }.boxed()
        }))
    }

    pub(crate) fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        (self.0)(ctx)
    }
}

/// Handler bound to a state: entry/exit actions, enter/exit hooks and
/// async actions all receive the state they run for.
#[derive(Clone)]
pub struct StateHook(Arc<StateHookFn>);

impl StateHook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StateId, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |state: StateId, ctx: Context| f(state, ctx).boxed()))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&StateId, &Context) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |state: StateId, ctx: Context| {
            let out = f(&state, &ctx);
            async move { out }.boxed()
        }))
    }

    pub(crate) fn call(&self, state: StateId, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        (self.0)(state, ctx)
    }
}

/// Handler receiving the source and target of a move: global transition
/// hooks and state-change hooks.
#[derive(Clone)]
pub struct TransitionHook(Arc<TransitionHookFn>);

impl TransitionHook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StateId, StateId, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(move |from: StateId, to: StateId, ctx: Context| {
            f(from, to, ctx).boxed()
        }))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&StateId, &StateId, &Context) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |from: StateId, to: StateId, ctx: Context| {
            let out = f(&from, &to, &ctx);
            async move { out }.boxed()
        }))
    }

    pub(crate) fn call(
        &self,
        from: StateId,
        to: StateId,
        ctx: Context,
    ) -> BoxFuture<'static, HandlerResult> {
        (self.0)(from, to, ctx)
    }
}

/// Last-resort handler for events no transition matched.
///
/// `Ok(None)` is the ignore reply: the hook declines and its result is
/// discarded.
#[derive(Clone)]
pub struct UnhandledHook(Arc<UnhandledHookFn>);

impl UnhandledHook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<Value>>> + Send + 'static,
    {
        Self(Arc::new(move |ctx: Context| f(ctx).boxed()))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Context) -> HandlerResult<Option<Value>> + Send + Sync + 'static,
    {
        Self(Arc::new(move |ctx: Context| {
            let out = f(&ctx);
            async move { out }.boxed()
        }))
    }

    pub(crate) fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult<Option<Value>>> {
        (self.0)(ctx)
    }
}

macro_rules! opaque_debug {
    ($($ty:ident),*) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(concat!(stringify!($ty), "(..)"))
                }
            }
        )*
    };
}

opaque_debug!(Condition, Action, StateHook, TransitionHook, UnhandledHook);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, StateConfig};
    use crate::engine::Machine;
    use serde_json::json;

    fn ctx() -> Context {
        let machine =
            Machine::new(Configuration::new("idle").state("idle", StateConfig::new()));
        Context::new(machine).with_payload(Some(json!({"n": 2})))
    }

    #[tokio::test]
    async fn test_sync_and_async_actions_agree() {
        let sync = Action::from_fn(|ctx| Ok(ctx.payload().cloned().unwrap_or_default()));
        let asynchronous = Action::new(|ctx: Context| async move {
            tokio::task::yield_now().await;
            Ok(ctx.payload().cloned().unwrap_or_default())
        });

        assert_eq!(sync.call(ctx()).await.unwrap(), json!({"n": 2}));
        assert_eq!(asynchronous.call(ctx()).await.unwrap(), json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_condition_from_fn() {
        let cond = Condition::from_fn(|ctx| ctx.payload().map(|p| p["n"] == 2).unwrap_or(false));
        assert!(cond.call(ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_state_and_transition_hooks_receive_states() {
        let hook = StateHook::from_fn(|state, _| Ok(json!(state.as_str())));
        let out = hook.call(StateId::from("idle"), ctx()).await.unwrap();
        assert_eq!(out, json!("idle"));

        let hook = TransitionHook::from_fn(|from, to, _| Ok(json!([from.as_str(), to.as_str()])));
        let out = hook
            .call(StateId::from("a"), StateId::from("b"), ctx())
            .await
            .unwrap();
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn test_debug_is_opaque() {
        let action = Action::from_fn(|_| Ok(Value::Null));
        assert_eq!(format!("{:?}", action), "Action(..)");
    }
}
