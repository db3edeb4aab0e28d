//! Interactive REPL.

use crate::commands::{format_json, parse_json_arg};
use crate::config::RunnerConfig;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use statehook_core::{Definition, Machine};
use std::time::Duration;

const HELP_TEXT: &str = r#"
Available commands:
  help                      Show this help

  start                     Start the machine
  stop                      Stop the machine

  send <event> [payload]    Handle an event directly
  queue <event> [payload]   Dispatch an event through the scheduler
  can <event> [payload]     Check whether an event would be handled

  state                     Show the current state (and submachines)
  data [state]              Show a state's data (default: current)
  sub                       Show the current state's submachine
  wait <ms>                 Let timers and async actions run

  quit, exit                Exit the REPL

Payloads are inline JSON or @file.json.
"#;

pub async fn run(
    definition: Definition,
    config: &RunnerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "statehook REPL".bold().cyan());
    println!(
        "Definition {} with {} state(s)",
        definition.checksum.cyan(),
        definition.raw.states.len()
    );

    let machine = Machine::new(definition.into_configuration());

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = config.history_file();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", prompt_for(&machine).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&machine, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
                if config.print_data {
                    if let Some(data) = machine.current_state_data() {
                        println!("{} {}\n", "data".dimmed(), data.snapshot());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    if let Err(e) = machine.stop().await {
        tracing::warn!("Failed to stop machine: {}", e);
    }
    println!("{}", "Stopped.".dimmed());

    Ok(())
}

fn prompt_for(machine: &Machine) -> String {
    format!("statehook[{}]>", machine.current_state())
}

async fn execute_repl_command(
    machine: &Machine,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let cmd = cmd.to_lowercase();

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "start" => {
            machine.start().await?;
            Ok(Some(format!(
                "{} in {}",
                "Started".green(),
                machine.current_state().to_string().yellow()
            )))
        }

        "stop" => {
            machine.stop().await?;
            Ok(Some("Stopped".green().to_string()))
        }

        "send" | "queue" => {
            let (event, payload) = event_args(&cmd, rest)?;
            let from = machine.current_state();
            let result = if cmd == "send" {
                machine.handle(&event, payload).await?
            } else {
                machine.dispatch(&event, payload).await?
            };

            let mut output = format!(
                "{} {} → {}",
                event.cyan(),
                from,
                machine.current_state().to_string().yellow()
            );
            if !result.is_null() {
                output.push('\n');
                output.push_str(&format_json(&result));
            }
            Ok(Some(output))
        }

        "can" => {
            let (event, payload) = event_args(&cmd, rest)?;
            let handled = machine.can_handle(&event, payload).await?;
            Ok(Some(if handled {
                format!("{} would be handled", event.cyan()).green().to_string()
            } else {
                format!("{} would not be handled", event.cyan())
            }))
        }

        "state" => Ok(Some(describe_state(machine))),

        "data" => {
            let data = if rest.is_empty() {
                machine.current_state_data()
            } else {
                machine.state_data(rest)
            };
            match data {
                Some(data) => Ok(Some(format_json(&data.snapshot()))),
                None if rest.is_empty() => Ok(Some("Machine is not running".yellow().to_string())),
                None => Err(format!("unknown state '{}'", rest).into()),
            }
        }

        "sub" => match machine.submachine() {
            Some(child) => Ok(Some(format!(
                "{} {}",
                "Submachine".cyan(),
                describe_state(&child)
            ))),
            None => Ok(Some("No submachine in the current state".yellow().to_string())),
        },

        "wait" => {
            let ms: u64 = rest
                .parse()
                .map_err(|_| "Usage: wait <ms>".to_string())?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Some(format!(
                "Now in {}",
                machine.current_state().to_string().yellow()
            )))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

/// Parses `<event> [payload]` for send/queue/can.
fn event_args(cmd: &str, rest: &str) -> Result<(String, Option<Value>), Box<dyn std::error::Error>> {
    let (event, payload) = match rest.split_once(char::is_whitespace) {
        Some((event, payload)) => (event, Some(payload.trim())),
        None => (rest, None),
    };
    if event.is_empty() {
        return Err(format!("Usage: {} <event> [payload_json]", cmd).into());
    }
    let payload = payload
        .filter(|p| !p.is_empty())
        .map(parse_json_arg)
        .transpose()?;
    Ok((event.to_string(), payload))
}

/// Current state, followed by the chain of active submachines.
fn describe_state(machine: &Machine) -> String {
    let mut output = machine.current_state().to_string();
    let mut child = machine.submachine();
    while let Some(sub) = child {
        output.push_str(&format!(" / {}", sub.current_state()));
        child = sub.submachine();
    }
    output
}
