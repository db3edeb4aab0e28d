//! State machine engine - lifecycle, event handling and transition execution.

use crate::action::PendingActions;
use crate::config::{Configuration, StateConfig, TransitionConfig, TransitionMode};
use crate::context::{Context, ContextFactory, DefaultContextFactory};
use crate::error::EngineError;
use crate::fanout::{collapse, resolve_unhandled, run_all, settle};
use crate::resolver::resolve;
use crate::scheduler::{FifoScheduler, TaskHandle, TaskScheduler};
use crate::state::{CurrentState, StateData, StateId};
use crate::submachine::Submachines;
use crate::timer::TimerSet;
use futures::future::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Builder for a [`Machine`] with custom collaborators.
pub struct MachineBuilder {
    config: Arc<Configuration>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    contexts: Option<Arc<dyn ContextFactory>>,
}

impl MachineBuilder {
    /// Uses `scheduler` for timer fires, async completions and [`Machine::dispatch`].
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn context_factory(mut self, contexts: Arc<dyn ContextFactory>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn build(self) -> Machine {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(FifoScheduler::new()));
        let contexts = self
            .contexts
            .unwrap_or_else(|| Arc::new(DefaultContextFactory));
        Machine::from_parts(self.config, scheduler, contexts)
    }
}

struct MachineInner {
    id: Uuid,
    config: Arc<Configuration>,
    scheduler: Arc<dyn TaskScheduler>,
    contexts: Arc<dyn ContextFactory>,

    current: RwLock<CurrentState>,

    /// One entry per configured state, never removed.
    state_data: HashMap<StateId, StateData>,

    submachines: Submachines,
    timers: TimerSet,
    pending_actions: PendingActions,
}

/// A running (or stopped) state machine.
///
/// Cloning yields another handle to the same machine. Handlers reach the
/// machine through [`Context::machine`].
#[derive(Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

impl Machine {
    /// Creates a stopped machine with the default FIFO scheduler.
    ///
    /// No runtime is needed until the machine arms timers or queues work.
    pub fn new(config: Configuration) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Configuration) -> MachineBuilder {
        MachineBuilder {
            config: Arc::new(config),
            scheduler: None,
            contexts: None,
        }
    }

    fn from_parts(
        config: Arc<Configuration>,
        scheduler: Arc<dyn TaskScheduler>,
        contexts: Arc<dyn ContextFactory>,
    ) -> Self {
        let state_data = config
            .states
            .keys()
            .map(|id| (id.clone(), StateData::new()))
            .collect();

        Self {
            inner: Arc::new(MachineInner {
                id: Uuid::new_v4(),
                config,
                scheduler,
                contexts,
                current: RwLock::new(CurrentState::Stopped),
                state_data,
                submachines: Submachines::default(),
                timers: TimerSet::default(),
                pending_actions: PendingActions::default(),
            }),
        }
    }

    /// Creates a child sharing this machine's collaborators.
    pub(crate) fn spawn_child(&self, config: Arc<Configuration>) -> Machine {
        Machine::from_parts(
            config,
            self.inner.scheduler.clone(),
            self.inner.contexts.clone(),
        )
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Arc<dyn TaskScheduler> {
        &self.inner.scheduler
    }

    pub fn current_state(&self) -> CurrentState {
        self.inner.current.read().clone()
    }

    pub fn is_started(&self) -> bool {
        !self.inner.current.read().is_stopped()
    }

    /// Scratch data of `state`; `None` for an unconfigured id.
    pub fn state_data(&self, state: &str) -> Option<StateData> {
        self.inner.state_data.get(state).cloned()
    }

    /// Scratch data of the active state; `None` while stopped.
    pub fn current_state_data(&self) -> Option<StateData> {
        let current = self.current_state();
        self.state_data(current.active()?.as_str())
    }

    /// Returns true if both handles refer to the same machine.
    pub fn ptr_eq(&self, other: &Machine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Builds a fresh context through the configured factory.
    pub fn build_context(&self) -> Context {
        self.inner.contexts.build(self)
    }

    pub(crate) fn submachines(&self) -> &Submachines {
        &self.inner.submachines
    }

    pub(crate) fn timers(&self) -> &TimerSet {
        &self.inner.timers
    }

    pub(crate) fn pending_actions(&self) -> &PendingActions {
        &self.inner.pending_actions
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Enters the initial state. Does nothing if already started.
    pub async fn start(&self) -> Result<Machine, EngineError> {
        if self.is_started() {
            return Ok(self.clone());
        }

        let initial = self.config().initial_state.clone();
        tracing::info!("[{}] Starting machine in '{}'", self.id(), initial);

        let ctx = self.build_context();
        self.enter_state(&initial, &ctx).await?;
        Ok(self.clone())
    }

    /// Exits the current state and stops. Does nothing if already stopped.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if !self.is_started() {
            return Ok(());
        }

        let ctx = self.build_context();
        self.exit_state(&ctx).await?;
        *self.inner.current.write() = CurrentState::Stopped;

        tracing::info!("[{}] Machine stopped", self.id());
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Handles `event` immediately in the caller's task.
    ///
    /// This bypasses the scheduler, so it may interleave with queued timer
    /// fires and async completions. Use [`Machine::dispatch`] for strict
    /// ordering.
    pub async fn handle(&self, event: &str, payload: Option<Value>) -> Result<Value, EngineError> {
        if !self.is_started() {
            return Err(EngineError::NotStarted);
        }

        let ctx = self.build_context().with_event(event).with_payload(payload);
        let state = self.current_state();

        match self.resolve_for_event(&ctx).await? {
            Some(transition) => self.execute_transition(transition, ctx).await,
            None => self.handle_unhandled(event, state, ctx).await,
        }
    }

    /// Queues `event` on the scheduler and waits for its outcome.
    ///
    /// Awaiting this from inside a unit already running on the same
    /// scheduler deadlocks; handlers should call [`Machine::handle`] instead.
    pub async fn dispatch(&self, event: &str, payload: Option<Value>) -> Result<Value, EngineError> {
        let machine = self.clone();
        let event = event.to_string();
        let task = async move { machine.handle(&event, payload).await }.boxed();
        self.inner.scheduler.enqueue(task).await
    }

    /// Returns whether `event` would match a transition right now.
    /// Runs conditions but nothing else.
    pub async fn can_handle(&self, event: &str, payload: Option<Value>) -> Result<bool, EngineError> {
        if !self.is_started() {
            return Ok(false);
        }
        let ctx = self.build_context().with_event(event).with_payload(payload);
        Ok(self.resolve_for_event(&ctx).await?.is_some())
    }

    async fn handle_unhandled(
        &self,
        event: &str,
        state: CurrentState,
        ctx: Context,
    ) -> Result<Value, EngineError> {
        let hooks = &self.config().global.unhandled_event_hooks;
        if !hooks.is_empty() {
            let replies = settle(hooks.iter().map(|hook| hook.call(ctx.clone()))).await;
            if let Some(value) = resolve_unhandled(replies)? {
                return Ok(value);
            }
        }

        tracing::debug!("[{}] Unhandled event '{}' in '{}'", self.id(), event, state);
        Err(EngineError::UnhandledEvent {
            event: event.to_string(),
            state,
            context: Box::new(ctx),
        })
    }

    /// Queues resolution and execution of `transitions` on the scheduler.
    ///
    /// Resolves to `Null` if nothing matched.
    pub(crate) fn execute_trigger(&self, transitions: Vec<TransitionConfig>, ctx: Context) -> TaskHandle {
        let machine = self.clone();
        let task = async move {
            match resolve(&transitions, &ctx).await? {
                Some(transition) => machine.execute_transition(transition, ctx).await,
                None => Ok(Value::Null),
            }
        }
        .boxed();
        self.inner.scheduler.enqueue(task)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    async fn execute_transition(
        &self,
        transition: &TransitionConfig,
        ctx: Context,
    ) -> Result<Value, EngineError> {
        let Some(current) = self.current_state().active().cloned() else {
            return Err(EngineError::NotStarted);
        };
        let target = transition
            .target_state
            .clone()
            .unwrap_or_else(|| current.clone());
        let mode = transition.mode();

        tracing::debug!(
            "[{}] Transition '{}' -> '{}' ({:?}, event={:?})",
            self.id(),
            current,
            target,
            mode,
            ctx.event()
        );

        if mode == TransitionMode::External {
            self.exit_state(&ctx).await?;
        }

        if mode != TransitionMode::Ignore {
            let hooks = &self.config().global.transition_hooks;
            run_all(
                hooks
                    .iter()
                    .map(|hook| hook.call(current.clone(), target.clone(), ctx.clone())),
            )
            .await?;
        }

        let results = run_all(transition.actions.iter().map(|action| action.call(ctx.clone()))).await?;

        if mode == TransitionMode::External {
            self.enter_state(&target, &ctx).await?;
        }

        Ok(collapse(results))
    }

    async fn enter_state(&self, state: &StateId, ctx: &Context) -> Result<(), EngineError> {
        let config = self
            .config()
            .get_state(state)
            .ok_or_else(|| EngineError::UnknownState {
                state: state.to_string(),
            })?;
        let global = &self.config().global;
        let previous = self.current_state();

        run_all(
            global
                .state_enter_hooks
                .iter()
                .map(|hook| hook.call(state.clone(), ctx.clone())),
        )
        .await?;
        run_all(
            config
                .entry_actions
                .iter()
                .map(|action| action.call(state.clone(), ctx.clone())),
        )
        .await?;

        if let Some(prev) = previous.active().filter(|prev| *prev != state) {
            run_all(
                global
                    .state_change_hooks
                    .iter()
                    .map(|hook| hook.call(prev.clone(), state.clone(), ctx.clone())),
            )
            .await?;
        }

        if let Err(e) = self.start_side_effects(state, config, ctx).await {
            self.stop_timers();
            self.cancel_async_actions();
            // Hooks above already ran; the machine keeps its previous state.
            tracing::error!(
                "[{}] Entering '{}' failed, staying in '{}': {}",
                self.id(),
                state,
                previous,
                e
            );
            return Err(e);
        }

        *self.inner.current.write() = CurrentState::Active(state.clone());
        tracing::debug!("[{}] Entered '{}'", self.id(), state);
        Ok(())
    }

    async fn start_side_effects(
        &self,
        state: &StateId,
        config: &StateConfig,
        ctx: &Context,
    ) -> Result<(), EngineError> {
        self.start_async_actions(state, config, ctx)?;
        self.start_timers(state, config)?;
        self.start_submachine(state, config).await
    }

    async fn exit_state(&self, ctx: &Context) -> Result<(), EngineError> {
        let Some(state) = self.current_state().active().cloned() else {
            return Ok(());
        };
        let config = self
            .config()
            .get_state(&state)
            .ok_or_else(|| EngineError::UnknownState {
                state: state.to_string(),
            })?;
        let global = &self.config().global;

        self.stop_submachine().await?;
        self.stop_timers();
        self.cancel_async_actions();

        run_all(
            global
                .state_exit_hooks
                .iter()
                .map(|hook| hook.call(state.clone(), ctx.clone())),
        )
        .await?;
        run_all(
            config
                .exit_actions
                .iter()
                .map(|action| action.call(state.clone(), ctx.clone())),
        )
        .await?;

        tracing::debug!("[{}] Exited '{}'", self.id(), state);
        Ok(())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.inner.id)
            .field("current", &self.current_state())
            .field("timers", &self.inner.timers.len())
            .field("async_actions", &self.inner.pending_actions.len())
            .field("submachines", &self.inner.submachines.len())
            .finish()
    }
}
