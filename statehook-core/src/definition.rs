//! Declarative machine definitions.
//!
//! Definitions are JSON or YAML documents whose handlers are names resolved
//! against a [`HandlerRegistry`]:
//!
//! ```yaml
//! initial: idle
//! global:
//!   on_transition: [log]
//!   on_unhandled: [echo]
//! states:
//!   idle:
//!     entry: [count]
//!     on:
//!       go:
//!         - to: running
//!           guard: "ctx.payload.speed > 3"
//!           actions: [echo]
//!   running:
//!     async:
//!       - run: succeed
//!         on_success: [{ to: done }]
//!     timers:
//!       - after_ms: 500
//!         transitions: [{ to: idle }]
//!   done: {}
//! ```
//!
//! Transition keys: `to`, `guard`, `actions`, `internal`, `ignore`. A state
//! may also declare `exit`, `any` (fallback transitions for any event) and a
//! nested `submachine` document.

use crate::config::{
    AsyncActionConfig, Configuration, GlobalHooks, StateConfig, TimerConfig, TransitionConfig,
};
use crate::error::EngineError;
use crate::guard;
use crate::registry::HandlerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Raw definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRaw {
    pub initial: String,

    #[serde(default)]
    pub global: GlobalRaw,

    pub states: BTreeMap<String, StateRaw>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalRaw {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_unhandled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_transition: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_enter: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_change: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateRaw {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<String>,

    /// Transitions keyed by event name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, Vec<TransitionRaw>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<TransitionRaw>,

    #[serde(rename = "async", default, skip_serializing_if = "Vec::is_empty")]
    pub async_actions: Vec<AsyncRaw>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<TimerRaw>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submachine: Option<Box<DefinitionRaw>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRaw {
    /// Target state; absent stays in the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub internal: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncRaw {
    /// Name of the state hook to run.
    pub run: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<TransitionRaw>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<TransitionRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerRaw {
    pub after_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionRaw>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A loaded definition and the configuration built from it.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Document as parsed, used for the checksum and re-serialization.
    pub raw: DefinitionRaw,

    /// CRC32C of the canonical JSON form.
    pub checksum: String,

    config: Configuration,
}

impl Definition {
    /// Builds a definition from an already parsed document.
    pub fn from_value(doc: &Value, registry: &HandlerRegistry) -> Result<Self, EngineError> {
        check_structure(doc, "definition")?;
        let raw: DefinitionRaw = serde_json::from_value(doc.clone())
            .map_err(|e| EngineError::config(format!("malformed definition: {}", e)))?;
        Self::from_raw(raw, registry)
    }

    pub fn from_json(text: &str, registry: &HandlerRegistry) -> Result<Self, EngineError> {
        let doc: Value = serde_json::from_str(text)?;
        Self::from_value(&doc, registry)
    }

    pub fn from_yaml(text: &str, registry: &HandlerRegistry) -> Result<Self, EngineError> {
        let doc: Value = serde_yaml::from_str(text)?;
        Self::from_value(&doc, registry)
    }

    /// Loads a file, choosing YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn from_file(path: impl AsRef<Path>, registry: &HandlerRegistry) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        tracing::debug!("Loading definition from {}", path.display());
        if is_yaml {
            Self::from_yaml(&text, registry)
        } else {
            Self::from_json(&text, registry)
        }
    }

    pub fn from_raw(raw: DefinitionRaw, registry: &HandlerRegistry) -> Result<Self, EngineError> {
        let config = build_configuration(&raw, registry, "")?;

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            raw,
            checksum,
            config,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn into_configuration(self) -> Configuration {
        self.config
    }

    /// Top-level state names, sorted.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.raw.states.keys().map(String::as_str)
    }

    /// Events with explicit transitions out of `state`, sorted.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        self.raw
            .states
            .get(state)
            .map(|s| s.on.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, EngineError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

/// The checks applied before typed parsing: the document, `global`,
/// `states` and every state must be objects.
fn check_structure(doc: &Value, at: &str) -> Result<(), EngineError> {
    let root = doc
        .as_object()
        .ok_or_else(|| EngineError::config(format!("{} must be an object", at)))?;

    if let Some(global) = root.get("global") {
        if !global.is_object() {
            return Err(EngineError::config(format!("{}: 'global' must be an object", at)));
        }
    }

    let states = root
        .get("states")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            EngineError::config(format!("{}: 'states' must map state names to states", at))
        })?;

    for (name, state) in states {
        let state = state.as_object().ok_or_else(|| {
            EngineError::config(format!("{}: state '{}' must be an object", at, name))
        })?;
        if let Some(nested) = state.get("submachine") {
            check_structure(nested, &format!("submachine of '{}'", name))?;
        }
    }
    Ok(())
}

fn build_configuration(
    raw: &DefinitionRaw,
    registry: &HandlerRegistry,
    prefix: &str,
) -> Result<Configuration, EngineError> {
    let global = GlobalHooks {
        unhandled_event_hooks: lookup_all(&raw.global.on_unhandled, |n| registry.unhandled_hook(n)),
        transition_hooks: lookup_all(&raw.global.on_transition, |n| registry.transition_hook(n)),
        state_enter_hooks: lookup_all(&raw.global.on_enter, |n| registry.state_hook(n)),
        state_exit_hooks: lookup_all(&raw.global.on_exit, |n| registry.state_hook(n)),
        state_change_hooks: lookup_all(&raw.global.on_change, |n| registry.transition_hook(n)),
    };

    if !raw.states.contains_key(&raw.initial) {
        tracing::warn!("{}initial state '{}' is not declared", prefix, raw.initial);
    }

    let mut config = Configuration::new(raw.initial.as_str()).global(global);
    for (name, state) in &raw.states {
        let at = format!("{}{}", prefix, name);
        config = config.state(name.as_str(), build_state(raw, state, registry, &at)?);
    }
    Ok(config)
}

fn build_state(
    doc: &DefinitionRaw,
    raw: &StateRaw,
    registry: &HandlerRegistry,
    at: &str,
) -> Result<StateConfig, EngineError> {
    let mut state = StateConfig::new();
    state.entry_actions = lookup_all(&raw.entry, |n| registry.state_hook(n));
    state.exit_actions = lookup_all(&raw.exit, |n| registry.state_hook(n));

    for (event, transitions) in &raw.on {
        for t in transitions {
            state = state.on(event.as_str(), build_transition(doc, t, registry, at)?);
        }
    }
    for t in &raw.any {
        state = state.on_any(build_transition(doc, t, registry, at)?);
    }

    for action in &raw.async_actions {
        let mut config = AsyncActionConfig::new(registry.state_hook(&action.run));
        for t in &action.on_success {
            config = config.on_success(build_transition(doc, t, registry, at)?);
        }
        for t in &action.on_failure {
            config = config.on_failure(build_transition(doc, t, registry, at)?);
        }
        state = state.async_action(config);
    }

    for timer in &raw.timers {
        let mut config = TimerConfig::after(Duration::from_millis(timer.after_ms));
        for t in &timer.transitions {
            config = config.transition(build_transition(doc, t, registry, at)?);
        }
        state = state.timer(config);
    }

    if let Some(nested) = &raw.submachine {
        let prefix = format!("{}/", at);
        state = state.submachine(build_configuration(nested, registry, &prefix)?);
    }

    Ok(state)
}

fn build_transition(
    doc: &DefinitionRaw,
    raw: &TransitionRaw,
    registry: &HandlerRegistry,
    at: &str,
) -> Result<TransitionConfig, EngineError> {
    let mut transition = match &raw.to {
        Some(target) => {
            if !doc.states.contains_key(target) {
                tracing::warn!("{}: transition target '{}' is not declared", at, target);
            }
            TransitionConfig::to(target.as_str())
        }
        None => TransitionConfig::stay(),
    };

    if let Some(source) = &raw.guard {
        let condition = guard::condition(source)
            .map_err(|e| EngineError::config(format!("{}: guard '{}': {}", at, source, e)))?;
        transition = transition.when(condition);
    }
    for name in &raw.actions {
        transition = transition.action(registry.action(name));
    }
    if raw.internal {
        transition = transition.internal();
    }
    if raw.ignore {
        transition = transition.ignored();
    }
    Ok(transition)
}

fn lookup_all<T>(names: &[String], lookup: impl Fn(&str) -> T) -> Vec<T> {
    names.iter().map(|n| lookup(n.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitionMode;
    use crate::engine::Machine;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    const TRAFFIC: &str = r#"
initial: red
global:
  on_transition: [log]
states:
  red:
    entry: [count]
    on:
      next:
        - to: green
          guard: "ctx.payload.cars > 0"
          actions: [echo]
        - actions: [echo]
          ignore: true
  green:
    timers:
      - after_ms: 10
        transitions: [{ to: yellow }]
  yellow:
    on:
      next: [{ to: red }]
"#;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_builtins()
    }

    #[test]
    fn test_load_yaml() {
        let def = Definition::from_yaml(TRAFFIC, &registry()).unwrap();
        assert_eq!(def.states().collect::<Vec<_>>(), vec!["green", "red", "yellow"]);
        assert_eq!(def.events_from("red"), vec!["next"]);
        assert!(def.events_from("green").is_empty());
        assert_eq!(def.checksum.len(), 8);

        let config = def.configuration();
        assert_eq!(config.initial_state.as_str(), "red");
        assert_eq!(config.global.transition_hooks.len(), 1);

        let red = config.get_state(&"red".into()).unwrap();
        let next = &red.events["next"].transitions;
        assert_eq!(next.len(), 2);
        assert!(next[0].condition.is_some());
        assert_eq!(next[1].mode(), TransitionMode::Ignore);

        let green = config.get_state(&"green".into()).unwrap();
        assert_eq!(green.timers[0].timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_checksum_is_format_independent() {
        let yaml = Definition::from_yaml(TRAFFIC, &registry()).unwrap();
        let json = Definition::from_json(&yaml.to_json().unwrap().to_string(), &registry()).unwrap();
        assert_eq!(yaml.checksum, json.checksum);

        let other = Definition::from_json(
            r#"{"initial": "a", "states": {"a": {}}}"#,
            &registry(),
        )
        .unwrap();
        assert_ne!(yaml.checksum, other.checksum);
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            json!([1, 2]),
            json!("idle"),
            json!({"initial": "a", "global": [], "states": {"a": {}}}),
            json!({"initial": "a"}),
            json!({"initial": "a", "states": ["a"]}),
            json!({"initial": "a", "states": {"a": 5}}),
            json!({"initial": "a", "states": {"a": {"submachine": {"initial": "x", "states": {"x": []}}}}}),
        ];
        for doc in cases {
            let result = Definition::from_value(&doc, &registry());
            assert!(
                matches!(result, Err(EngineError::Config { .. })),
                "expected config error for {}",
                doc
            );
        }
    }

    #[test]
    fn test_malformed_fields_are_config_errors() {
        let doc = json!({"initial": "a", "states": {"a": {"timers": [{"after_ms": "soon"}]}}});
        assert!(matches!(
            Definition::from_value(&doc, &registry()),
            Err(EngineError::Config { .. })
        ));

        let doc = json!({"initial": "a", "states": {"a": {"on": {"go": [{"to": "a", "guard": "ctx.x =="}]}}}});
        match Definition::from_value(&doc, &registry()) {
            Err(EngineError::Config { reason }) => assert!(reason.contains("guard")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            Definition::from_json("{not json", &registry()),
            Err(EngineError::Json(_))
        ));
        assert!(matches!(
            Definition::from_yaml("states: [unclosed", &registry()),
            Err(EngineError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("traffic.yaml");
        std::fs::write(&yaml_path, TRAFFIC).unwrap();
        let from_yaml = Definition::from_file(&yaml_path, &registry()).unwrap();

        let json_path = dir.path().join("traffic.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, "{}", from_yaml.to_json().unwrap()).unwrap();
        let from_json = Definition::from_file(&json_path, &registry()).unwrap();

        assert_eq!(from_yaml.checksum, from_json.checksum);
        assert!(matches!(
            Definition::from_file(dir.path().join("missing.json"), &registry()),
            Err(EngineError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_loaded_machine_runs() {
        let def = Definition::from_yaml(TRAFFIC, &registry()).unwrap();
        let machine = Machine::new(def.into_configuration());
        machine.start().await.unwrap();
        assert_eq!(machine.state_data("red").unwrap().get("visits"), Some(json!(1)));

        // Guard fails, the ignore fallback echoes the payload.
        let result = machine.handle("next", Some(json!({"cars": 0}))).await.unwrap();
        assert_eq!(result, json!({"cars": 0}));
        assert!(machine.current_state().is("red"));

        machine.handle("next", Some(json!({"cars": 2}))).await.unwrap();
        assert!(machine.current_state().is("green"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(machine.current_state().is("yellow"));

        machine.handle("next", None).await.unwrap();
        assert_eq!(machine.state_data("red").unwrap().get("visits"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_async_and_submachine_from_yaml() {
        let doc = r#"
initial: fetch
states:
  fetch:
    async:
      - run: succeed
        on_success: [{ to: nested }]
        on_failure: [{ to: broken }]
  nested:
    submachine:
      initial: inner
      states:
        inner:
          entry: [count]
  broken: {}
"#;
        let def = Definition::from_yaml(doc, &registry()).unwrap();
        let machine = Machine::new(def.into_configuration());

        machine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(machine.current_state().is("nested"));

        let child = machine.submachine().unwrap();
        assert!(child.current_state().is("inner"));
        assert_eq!(child.state_data("inner").unwrap().get("visits"), Some(json!(1)));
        // Parent and child keep separate scratch data.
        assert!(machine.state_data("inner").is_none());
    }

    #[tokio::test]
    async fn test_unknown_handler_fails_on_use() {
        let doc = json!({
            "initial": "a",
            "states": {"a": {"on": {"go": [{"actions": ["launch_rockets"], "ignore": true}]}}}
        });
        let def = Definition::from_value(&doc, &registry()).unwrap();
        let machine = Machine::new(def.into_configuration());
        machine.start().await.unwrap();

        let result = machine.handle("go", None).await;
        assert!(matches!(result, Err(EngineError::Handler { .. })));
    }
}
