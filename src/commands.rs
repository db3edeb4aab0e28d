//! One-shot runner commands.

use crate::config::RunnerConfig;
use colored::Colorize;
use serde_json::Value;
use statehook_core::{Definition, HandlerRegistry, Machine};
use std::path::Path;

/// An event to apply, with its optional payload.
pub type EventArg = (String, Option<Value>);

/// Loads a definition file against the built-in handlers.
pub fn load_definition(path: &Path) -> Result<Definition, Box<dyn std::error::Error>> {
    let definition = Definition::from_file(path, &HandlerRegistry::with_builtins())?;
    tracing::debug!(
        "Loaded definition {} (checksum {})",
        path.display(),
        definition.checksum
    );
    Ok(definition)
}

/// Summarizes a loaded definition.
pub fn check(definition: &Definition) -> String {
    let raw = &definition.raw;
    let mut output = format!(
        "{} checksum {}\n",
        "OK".green(),
        definition.checksum.cyan()
    );
    output.push_str(&format!("initial: {}\n", raw.initial.yellow()));
    output.push_str(&format!("states ({}):\n", raw.states.len()));

    for (name, state) in &raw.states {
        let mut line = format!("  {}", name.bold());
        let events = definition.events_from(name);
        if !events.is_empty() {
            line.push_str(&format!(" on [{}]", events.join(", ")));
        }
        if !state.any.is_empty() {
            line.push_str(" +any");
        }
        if !state.timers.is_empty() {
            line.push_str(&format!(" timers={}", state.timers.len()));
        }
        if !state.async_actions.is_empty() {
            line.push_str(&format!(" async={}", state.async_actions.len()));
        }
        if state.submachine.is_some() {
            line.push_str(&format!(" {}", "[submachine]".dimmed()));
        }
        output.push_str(&line);
        output.push('\n');
    }

    if !raw.states.contains_key(&raw.initial) {
        output.push_str(&format!(
            "{}: initial state '{}' is not declared\n",
            "Warning".yellow(),
            raw.initial
        ));
    }

    output
}

/// Starts a machine, applies `events` in order, then waits the settle delay
/// so timers and async actions can finish.
pub async fn run(
    definition: Definition,
    events: &[EventArg],
    config: &RunnerConfig,
) -> Result<String, Box<dyn std::error::Error>> {
    let machine = Machine::new(definition.into_configuration());
    machine.start().await?;

    let mut output = format!("{} {}\n", "start".cyan(), machine.current_state());
    output.push_str(&data_line(&machine, config));

    for (event, payload) in events {
        match machine.handle(event, payload.clone()).await {
            Ok(result) => {
                output.push_str(&format!(
                    "{} -> {}",
                    event.cyan(),
                    machine.current_state().to_string().yellow()
                ));
                if !result.is_null() {
                    output.push_str(&format!(" {}", result));
                }
                output.push('\n');
            }
            Err(e) => output.push_str(&format!("{} {}: {}\n", event.cyan(), "failed".red(), e)),
        }
        output.push_str(&data_line(&machine, config));
    }

    if config.settle_ms > 0 {
        tokio::time::sleep(config.settle()).await;
        output.push_str(&format!(
            "{} {}\n",
            "settled".cyan(),
            machine.current_state().to_string().yellow()
        ));
        output.push_str(&data_line(&machine, config));
    }

    machine.stop().await?;
    Ok(output)
}

fn data_line(machine: &Machine, config: &RunnerConfig) -> String {
    if !config.print_data {
        return String::new();
    }
    match machine.current_state_data() {
        Some(data) => format!("  {} {}\n", "data".dimmed(), data.snapshot()),
        None => String::new(),
    }
}

/// Parses `name` or `name:payload`, where the payload is inline JSON or
/// `@file.json`.
pub fn parse_event_arg(arg: &str) -> Result<EventArg, Box<dyn std::error::Error>> {
    let arg = arg.trim();
    match arg.split_once(':') {
        Some((name, payload)) if !name.is_empty() => {
            Ok((name.to_string(), Some(parse_json_arg(payload.trim())?)))
        }
        Some(_) => Err(format!("missing event name in '{}'", arg).into()),
        None if arg.is_empty() => Err("empty event name".into()),
        None => Ok((arg.to_string(), None)),
    }
}

/// Splits a comma separated event list, ignoring commas inside JSON
/// payloads.
pub fn parse_event_list(list: &str) -> Result<Vec<EventArg>, Box<dyn std::error::Error>> {
    let mut events = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                events.push(parse_event_arg(&list[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !list[start..].trim().is_empty() {
        events.push(parse_event_arg(&list[start..])?);
    }

    Ok(events)
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
