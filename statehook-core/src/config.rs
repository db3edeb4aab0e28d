//! Machine configuration model.
//!
//! A [`Configuration`] is assembled once, either programmatically with the
//! builder methods below or from a declarative document through
//! [`crate::definition::Definition`], and is never mutated afterwards.

use crate::handler::{Action, Condition, StateHook, TransitionHook, UnhandledHook};
use crate::state::StateId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Complete description of one machine.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// State entered by `start()`.
    pub initial_state: StateId,

    /// Hooks applying to every state.
    pub global: GlobalHooks,

    /// Configured states.
    pub states: HashMap<StateId, StateConfig>,
}

impl Configuration {
    pub fn new(initial_state: impl Into<StateId>) -> Self {
        Self {
            initial_state: initial_state.into(),
            global: GlobalHooks::default(),
            states: HashMap::new(),
        }
    }

    /// Adds (or replaces) a state.
    pub fn state(mut self, id: impl Into<StateId>, config: StateConfig) -> Self {
        self.states.insert(id.into(), config);
        self
    }

    pub fn global(mut self, global: GlobalHooks) -> Self {
        self.global = global;
        self
    }

    pub fn get_state(&self, id: &StateId) -> Option<&StateConfig> {
        self.states.get(id)
    }

    pub fn has_state(&self, id: &StateId) -> bool {
        self.states.contains_key(id)
    }
}

/// Hooks invoked for every state of a machine.
#[derive(Debug, Clone, Default)]
pub struct GlobalHooks {
    pub unhandled_event_hooks: Vec<UnhandledHook>,
    pub transition_hooks: Vec<TransitionHook>,
    pub state_enter_hooks: Vec<StateHook>,
    pub state_exit_hooks: Vec<StateHook>,
    pub state_change_hooks: Vec<TransitionHook>,
}

impl GlobalHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_unhandled(mut self, hook: UnhandledHook) -> Self {
        self.unhandled_event_hooks.push(hook);
        self
    }

    pub fn on_transition(mut self, hook: TransitionHook) -> Self {
        self.transition_hooks.push(hook);
        self
    }

    pub fn on_enter(mut self, hook: StateHook) -> Self {
        self.state_enter_hooks.push(hook);
        self
    }

    pub fn on_exit(mut self, hook: StateHook) -> Self {
        self.state_exit_hooks.push(hook);
        self
    }

    pub fn on_change(mut self, hook: TransitionHook) -> Self {
        self.state_change_hooks.push(hook);
        self
    }
}

/// Configuration of a single state.
#[derive(Debug, Clone, Default)]
pub struct StateConfig {
    pub entry_actions: Vec<StateHook>,
    pub exit_actions: Vec<StateHook>,

    /// Event-specific triggers, keyed by event name.
    pub events: HashMap<String, EventConfig>,

    /// Fallback consulted when no event-specific transition matched.
    pub any_event_trigger: Option<TriggerConfig>,

    pub async_actions: Vec<AsyncActionConfig>,
    pub timers: Vec<TimerConfig>,

    /// Nested machine run while this state is active.
    pub submachine: Option<Arc<Configuration>>,
}

impl StateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, action: StateHook) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn exit(mut self, action: StateHook) -> Self {
        self.exit_actions.push(action);
        self
    }

    /// Appends a candidate transition for `event`.
    pub fn on(mut self, event: impl Into<String>, transition: TransitionConfig) -> Self {
        self.events
            .entry(event.into())
            .or_default()
            .transitions
            .push(transition);
        self
    }

    /// Appends a candidate transition to the any-event fallback.
    pub fn on_any(mut self, transition: TransitionConfig) -> Self {
        self.any_event_trigger
            .get_or_insert_with(TriggerConfig::default)
            .transitions
            .push(transition);
        self
    }

    pub fn async_action(mut self, action: AsyncActionConfig) -> Self {
        self.async_actions.push(action);
        self
    }

    pub fn timer(mut self, timer: TimerConfig) -> Self {
        self.timers.push(timer);
        self
    }

    pub fn submachine(mut self, config: Configuration) -> Self {
        self.submachine = Some(Arc::new(config));
        self
    }
}

/// Ordered list of candidate transitions evaluated together.
#[derive(Debug, Clone, Default)]
pub struct TriggerConfig {
    pub transitions: Vec<TransitionConfig>,
}

impl TriggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(mut self, transition: TransitionConfig) -> Self {
        self.transitions.push(transition);
        self
    }
}

impl From<Vec<TransitionConfig>> for TriggerConfig {
    fn from(transitions: Vec<TransitionConfig>) -> Self {
        Self { transitions }
    }
}

/// Trigger bound to a named event.
pub type EventConfig = TriggerConfig;

/// How a matched transition is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionMode {
    /// Exit, transition hooks, actions, enter.
    External,
    /// Transition hooks and actions, no exit/enter.
    Internal,
    /// Actions only.
    Ignore,
}

/// A configured response to a trigger.
#[derive(Debug, Clone, Default)]
pub struct TransitionConfig {
    pub condition: Option<Condition>,
    pub actions: Vec<Action>,

    /// Target state; `None` stays in the current state.
    pub target_state: Option<StateId>,

    pub is_internal: bool,
    pub ignore: bool,
}

impl TransitionConfig {
    /// Transition to `target`.
    pub fn to(target: impl Into<StateId>) -> Self {
        Self {
            target_state: Some(target.into()),
            ..Self::default()
        }
    }

    /// Transition without a target; re-enters the current state in external mode.
    pub fn stay() -> Self {
        Self::default()
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn internal(mut self) -> Self {
        self.is_internal = true;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// `ignore` takes precedence over `is_internal` when both are set.
    pub fn mode(&self) -> TransitionMode {
        if self.ignore {
            TransitionMode::Ignore
        } else if self.is_internal {
            TransitionMode::Internal
        } else {
            TransitionMode::External
        }
    }
}

/// Background operation started on state entry.
#[derive(Debug, Clone)]
pub struct AsyncActionConfig {
    pub action: StateHook,
    pub success_trigger: TriggerConfig,
    pub failure_trigger: TriggerConfig,
}

impl AsyncActionConfig {
    pub fn new(action: StateHook) -> Self {
        Self {
            action,
            success_trigger: TriggerConfig::default(),
            failure_trigger: TriggerConfig::default(),
        }
    }

    pub fn on_success(mut self, transition: TransitionConfig) -> Self {
        self.success_trigger.transitions.push(transition);
        self
    }

    pub fn on_failure(mut self, transition: TransitionConfig) -> Self {
        self.failure_trigger.transitions.push(transition);
        self
    }
}

/// Timeout trigger started on state entry.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub timeout: Duration,
    pub transitions: Vec<TransitionConfig>,
}

impl TimerConfig {
    pub fn after(timeout: Duration) -> Self {
        Self {
            timeout,
            transitions: Vec::new(),
        }
    }

    pub fn transition(mut self, transition: TransitionConfig) -> Self {
        self.transitions.push(transition);
        self
    }
}
