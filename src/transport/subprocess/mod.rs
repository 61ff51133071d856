//! Subprocess invocation of the agent CLI
//!
//! Builds the command line and environment for a turn and spawns it with
//! piped stdio.

mod command;
pub mod config;
mod environment;
mod spawner;

pub use command::{CommandBuilder, find_agent_binary, resolve_program};
pub use environment::{EnvironmentComposer, ensure_locale, is_local_endpoint, split_toolbox_paths};
pub use spawner::TokioSpawner;
