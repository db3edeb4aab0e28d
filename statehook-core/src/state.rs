//! State identifiers and per-state scratch data.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifier of a configured state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for StateId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a machine currently is.
///
/// `Stopped` is not a state of the configuration; it only means the machine
/// is not running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrentState {
    #[default]
    Stopped,
    Active(StateId),
}

impl CurrentState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, CurrentState::Stopped)
    }

    /// Returns the active state id, if running.
    pub fn active(&self) -> Option<&StateId> {
        match self {
            CurrentState::Stopped => None,
            CurrentState::Active(id) => Some(id),
        }
    }

    /// Returns true if the machine is running in the given state.
    pub fn is(&self, state: &str) -> bool {
        self.active().map(|id| id.as_str() == state).unwrap_or(false)
    }
}

impl fmt::Display for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentState::Stopped => f.write_str("<stopped>"),
            CurrentState::Active(id) => write!(f, "{}", id),
        }
    }
}

/// Mutable scratch storage attached to one state of one machine.
///
/// Cloning yields another handle to the same storage. Entries survive any
/// number of exits and re-entries of the state.
#[derive(Debug, Clone, Default)]
pub struct StateData {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl StateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    /// Stores a value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Removes every entry. The engine itself never calls this.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Applies `f` to the map under a single write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Returns a copy of the contents as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.inner.read().clone())
    }

    /// Returns true if both handles point at the same storage.
    pub fn ptr_eq(&self, other: &StateData) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_state_accessors() {
        let stopped = CurrentState::Stopped;
        assert!(stopped.is_stopped());
        assert!(stopped.active().is_none());
        assert!(!stopped.is("idle"));

        let idle = CurrentState::Active(StateId::from("idle"));
        assert!(!idle.is_stopped());
        assert_eq!(idle.active().map(|s| s.as_str()), Some("idle"));
        assert!(idle.is("idle"));
        assert_eq!(idle.to_string(), "idle");
        assert_eq!(stopped.to_string(), "<stopped>");
    }

    #[test]
    fn test_state_data_is_shared_between_handles() {
        let data = StateData::new();
        let other = data.clone();

        assert!(data.is_empty());
        other.insert("count", json!(1));

        assert_eq!(data.get("count"), Some(json!(1)));
        assert!(data.ptr_eq(&other));
        assert_eq!(data.snapshot(), json!({"count": 1}));
    }

    #[test]
    fn test_state_data_update() {
        let data = StateData::new();
        data.update(|map| {
            map.insert("a".to_string(), json!(1));
            map.insert("b".to_string(), json!(2));
        });
        assert_eq!(data.len(), 2);
        assert_eq!(data.remove("a"), Some(json!(1)));
        assert!(!data.contains_key("a"));
        data.clear();
        assert!(data.is_empty());
    }
}
