//! Nested machines.
//!
//! A state may carry a nested configuration. The parent lazily creates one
//! child machine per such state, keeps it for its whole lifetime and starts
//! or stops it as the state is entered or left. Children share the parent's
//! scheduler and context factory.

use crate::config::StateConfig;
use crate::engine::Machine;
use crate::error::EngineError;
use crate::state::StateId;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};

/// Child machines of one parent, keyed by the state that owns them.
#[derive(Debug, Default)]
pub(crate) struct Submachines {
    children: DashMap<StateId, Machine>,
}

impl Submachines {
    pub(crate) fn get(&self, state: &str) -> Option<Machine> {
        self.children.get(state).map(|child| child.value().clone())
    }

    fn get_or_create(&self, state: &StateId, create: impl FnOnce() -> Machine) -> Machine {
        self.children.entry(state.clone()).or_insert_with(create).value().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }
}

impl Machine {
    /// The child machine of the active state, if it has one.
    pub fn submachine(&self) -> Option<Machine> {
        let current = self.current_state();
        self.submachines().get(current.active()?.as_str())
    }

    /// The child machine created for `state`, whether or not it is active.
    pub fn submachine_for(&self, state: &str) -> Option<Machine> {
        self.submachines().get(state)
    }

    /// Starts the child of `state`, creating it on first entry.
    pub(crate) async fn start_submachine(&self, state: &StateId, config: &StateConfig) -> Result<(), EngineError> {
        let Some(nested) = &config.submachine else {
            return Ok(());
        };
        let child = self
            .submachines()
            .get_or_create(state, || self.spawn_child(nested.clone()));

        tracing::debug!("[{}] Starting submachine {} for '{}'", self.id(), child.id(), state);
        child.start_boxed().await
    }

    /// Stops the child of the active state, if any.
    pub(crate) async fn stop_submachine(&self) -> Result<(), EngineError> {
        match self.submachine() {
            Some(child) => {
                tracing::debug!("[{}] Stopping submachine {}", self.id(), child.id());
                child.stop_boxed().await
            }
            None => Ok(()),
        }
    }

    // Parent and child futures would otherwise contain each other.
    fn start_boxed(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let machine = self.clone();
        async move { machine.start().await.map(|_| ()) }.boxed()
    }

    fn stop_boxed(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let machine = self.clone();
        async move { machine.stop().await }.boxed()
    }
}
