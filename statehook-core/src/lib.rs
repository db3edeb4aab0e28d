//! # statehook-core
//!
//! Hierarchical, hook-driven state machine engine.
//!
//! This crate provides:
//! - A configuration model of states, transitions, hooks, timers, async
//!   actions and nested submachines
//! - The [`Machine`] engine: lifecycle, event handling and transition execution
//! - A FIFO [`TaskScheduler`] serializing timer fires and async completions
//! - Guard expressions and declarative JSON/YAML definitions
//!
//! ```no_run
//! use statehook_core::{Configuration, Machine, StateConfig, TransitionConfig};
//!
//! # async fn demo() -> Result<(), statehook_core::EngineError> {
//! let config = Configuration::new("idle")
//!     .state("idle", StateConfig::new().on("go", TransitionConfig::to("running")))
//!     .state("running", StateConfig::new());
//!
//! let machine = Machine::new(config);
//! machine.start().await?;
//! machine.handle("go", None).await?;
//! assert!(machine.current_state().is("running"));
//! # Ok(())
//! # }
//! ```

mod action;
pub mod config;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod handler;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod state;
mod submachine;
mod timer;

pub use config::{
    AsyncActionConfig, Configuration, EventConfig, GlobalHooks, StateConfig, TimerConfig,
    TransitionConfig, TransitionMode, TriggerConfig,
};
pub use context::{Context, ContextFactory, DefaultContextFactory};
pub use definition::Definition;
pub use engine::{Machine, MachineBuilder};
pub use error::EngineError;
pub use guard::Guard;
pub use handler::{Action, Condition, HandlerResult, StateHook, TransitionHook, UnhandledHook};
pub use registry::HandlerRegistry;
pub use scheduler::{FifoScheduler, Task, TaskHandle, TaskScheduler};
pub use state::{CurrentState, StateData, StateId};
