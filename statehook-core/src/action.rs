//! Async actions.
//!
//! An async action is a state hook started in the background when its state
//! is entered. On completion the machine follows the action's success or
//! failure transitions, unless the state was left in the meantime, in which
//! case the outcome is dropped. Cancellation is soft: an action that has
//! been launched always runs to completion.

use crate::config::{AsyncActionConfig, StateConfig};
use crate::context::Context;
use crate::engine::Machine;
use crate::error::EngineError;
use crate::scheduler::Task;
use crate::state::StateId;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Cancellation tokens of the async actions started for the current state.
#[derive(Debug, Default)]
pub(crate) struct PendingActions {
    tokens: Mutex<Vec<CancellationToken>>,
}

impl PendingActions {
    fn register(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().push(token.clone());
        token
    }

    fn cancel_all(&self) -> usize {
        let tokens: Vec<_> = self.tokens.lock().drain(..).collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

impl Machine {
    /// Queues the async actions of `config`, entered as `state`.
    ///
    /// Each action gets a token before anything is queued, so a state left
    /// right after entry still cancels it.
    pub(crate) fn start_async_actions(
        &self,
        state: &StateId,
        config: &StateConfig,
        ctx: &Context,
    ) -> Result<(), EngineError> {
        for action in &config.async_actions {
            let token = self.pending_actions().register();
            let submission = self
                .scheduler()
                .enqueue(self.deferred_action(action.clone(), state.clone(), ctx.clone(), token));

            // Only a submission that failed outright is reported here.
            if let Some(Err(e)) = submission.now_or_never() {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Cancels every async action started for the current state.
    pub(crate) fn cancel_async_actions(&self) {
        let cancelled = self.pending_actions().cancel_all();
        if cancelled > 0 {
            tracing::debug!("[{}] Cancelled {} async action(s)", self.id(), cancelled);
        }
    }

    /// Two queue hops: the first unit queues the second, which spawns the
    /// action unless its state was left in between. Neither waits for the
    /// action.
    fn deferred_action(
        &self,
        action: AsyncActionConfig,
        state: StateId,
        ctx: Context,
        token: CancellationToken,
    ) -> Task {
        let machine = self.clone();
        async move {
            let launcher = machine.clone();
            let launch: Task = async move {
                if token.is_cancelled() {
                    tracing::debug!(
                        "[{}] Async action in '{}' not started; its state was already left",
                        launcher.id(),
                        state
                    );
                    return Ok(Value::Null);
                }
                tokio::spawn(launcher.run_async_action(action, state, ctx, token));
                Ok(Value::Null)
            }
            .boxed();
            drop(machine.scheduler().enqueue(launch));
            Ok(Value::Null)
        }
        .boxed()
    }

    fn run_async_action(
        self,
        action: AsyncActionConfig,
        state: StateId,
        ctx: Context,
        token: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        async move {
            tracing::debug!("[{}] Async action started in '{}'", self.id(), state);
            let outcome = action.action.call(state.clone(), ctx).await;

            if token.is_cancelled() {
                tracing::debug!(
                    "[{}] Async action in '{}' finished after its state was left; outcome dropped",
                    self.id(),
                    state
                );
                return;
            }

            let fresh = self.build_context();
            let (transitions, ctx, label) = match outcome {
                Ok(result) => (action.success_trigger.transitions, fresh.with_result(result), "success"),
                Err(error) => (action.failure_trigger.transitions, fresh.with_error(error), "failure"),
            };

            if let Err(e) = self.execute_trigger(transitions, ctx).await {
                tracing::warn!(
                    "[{}] Async action {} transition from '{}' failed: {}",
                    self.id(),
                    label,
                    state,
                    e
                );
            }
        }
        .boxed()
    }
}
