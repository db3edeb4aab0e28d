//! State timers.
//!
//! Entering a state arms one Tokio task per configured timer. Each task
//! sleeps for its timeout and then queues the timer's transitions on the
//! machine's scheduler. Leaving the state aborts every armed task.

use crate::config::StateConfig;
use crate::engine::Machine;
use crate::error::EngineError;
use crate::state::StateId;
use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// Timers armed for the current state of one machine.
#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    handles: Mutex<Vec<AbortHandle>>,
}

impl TimerSet {
    fn arm(&self, handle: AbortHandle) {
        self.handles.lock().push(handle);
    }

    /// Aborts every armed timer, returning how many were still tracked.
    fn disarm_all(&self) -> usize {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Machine {
    /// Arms the timers of `config`, entered as `state`.
    pub(crate) fn start_timers(&self, state: &StateId, config: &StateConfig) -> Result<(), EngineError> {
        if config.timers.is_empty() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        for timer in &config.timers {
            let machine = self.clone();
            let state = state.clone();
            let timeout = timer.timeout;
            let transitions = timer.transitions.clone();

            let task = runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::debug!("[{}] Timer in '{}' fired after {:?}", machine.id(), state, timeout);

                let ctx = machine.build_context();
                if let Err(e) = machine.execute_trigger(transitions, ctx).await {
                    tracing::warn!("[{}] Timer transition from '{}' failed: {}", machine.id(), state, e);
                }
            });
            self.timers().arm(task.abort_handle());
        }
        Ok(())
    }

    /// Aborts every timer armed for the current state.
    pub(crate) fn stop_timers(&self) {
        let stopped = self.timers().disarm_all();
        if stopped > 0 {
            tracing::debug!("[{}] Cancelled {} timer(s)", self.id(), stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, TimerConfig, TransitionConfig};
    use crate::context::Context;
    use crate::handler::{Condition, StateHook};
    use crate::state::CurrentState;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn ping_pong(ms: u64) -> Configuration {
        Configuration::new("ping")
            .state(
                "ping",
                StateConfig::new().timer(
                    TimerConfig::after(Duration::from_millis(ms)).transition(TransitionConfig::to("pong")),
                ),
            )
            .state("pong", StateConfig::new())
    }

    #[tokio::test]
    async fn test_timer_moves_machine() {
        let machine = Machine::new(ping_pong(10));
        machine.start().await.unwrap();
        assert_eq!(machine.timers().len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(machine.current_state().is("pong"));
        assert_eq!(machine.timers().len(), 0);
    }

    #[tokio::test]
    async fn test_leaving_state_disarms_timer() {
        let config = Configuration::new("ping")
            .state(
                "ping",
                StateConfig::new()
                    .timer(TimerConfig::after(Duration::from_millis(30)).transition(TransitionConfig::to("pong")))
                    .on("leave", TransitionConfig::to("elsewhere")),
            )
            .state("pong", StateConfig::new())
            .state("elsewhere", StateConfig::new());

        let machine = Machine::new(config);
        machine.start().await.unwrap();
        machine.handle("leave", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(machine.current_state().is("elsewhere"));
    }

    #[tokio::test]
    async fn test_stop_disarms_timer() {
        let machine = Machine::new(ping_pong(20));
        machine.start().await.unwrap();
        machine.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(machine.current_state(), CurrentState::Stopped);
    }

    #[tokio::test]
    async fn test_timer_runs_guarded_transitions_in_order() {
        let config = Configuration::new("wait")
            .state(
                "wait",
                StateConfig::new().timer(
                    TimerConfig::after(Duration::from_millis(5))
                        .transition(TransitionConfig::to("never").when(Condition::from_fn(|_| false)))
                        .transition(TransitionConfig::to("done")),
                ),
            )
            .state("never", StateConfig::new())
            .state(
                "done",
                StateConfig::new().entry(StateHook::from_fn(|state: &StateId, ctx: &Context| {
                    if let Some(data) = ctx.machine().state_data(state.as_str()) {
                        data.insert("reached", json!(true));
                    }
                    Ok(Value::Null)
                })),
            );

        let machine = Machine::new(config);
        machine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(machine.current_state().is("done"));
        assert_eq!(machine.state_data("done").unwrap().get("reached"), Some(json!(true)));
    }

    #[test]
    fn test_timers_need_a_runtime() {
        let machine = Machine::new(ping_pong(10));
        let result = futures::executor::block_on(machine.start());
        assert!(matches!(result, Err(EngineError::NoRuntime)));
        assert_eq!(machine.current_state(), CurrentState::Stopped);
    }
}
