//! Agent command line construction

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::{OrchestraError, Result};
use crate::types::connection::{Connection, ConnectionMode};
use crate::types::identifiers::AgentThreadId;
use crate::types::options::{SessionConfig, TurnRequest};

use super::config::{DEFAULT_AGENT_BINARY, NODE_ARGS, STREAMING_ARGS, env_keys};
use crate::transport::CommandSpec;

/// Command builder for one agent turn
pub struct CommandBuilder<'a> {
    connection: &'a Connection,
    config: &'a SessionConfig,
    turn: &'a TurnRequest,
    thread_id: Option<&'a AgentThreadId>,
}

impl<'a> CommandBuilder<'a> {
    /// Create a builder for a fresh thread
    pub fn new(connection: &'a Connection, config: &'a SessionConfig, turn: &'a TurnRequest) -> Self {
        Self {
            connection,
            config,
            turn,
            thread_id: None,
        }
    }

    /// Continue an established thread instead of starting one
    #[must_use]
    pub fn continuing(mut self, thread_id: Option<&'a AgentThreadId>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Build the command against a fully composed environment
    ///
    /// # Errors
    /// Returns error if a script agent needs `node` and none is installed
    pub fn build(&self, env: HashMap<String, String>) -> Result<CommandSpec> {
        let (program, mut args) = resolve_program(self.connection)?;

        if let Some(thread_id) = self.thread_id {
            args.extend(["threads".to_string(), "continue".to_string()]);
            args.push(thread_id.as_str().to_string());
        }

        self.add_extra_args(&mut args, &env);
        args.extend(STREAMING_ARGS.iter().map(|s| (*s).to_string()));
        self.add_session_args(&mut args);

        Ok(CommandSpec {
            program,
            args,
            cwd: self.turn.working_directory.clone(),
            env,
        })
    }

    /// Add arguments from `AMP_EXTRA_ARGS`, split as shell words
    fn add_extra_args(&self, args: &mut Vec<String>, env: &HashMap<String, String>) {
        let Some(raw) = env.get(env_keys::EXTRA_ARGS) else {
            return;
        };
        match shlex::split(raw) {
            Some(extra) => args.extend(extra),
            None => log::warn!("Ignoring {}: unbalanced quoting", env_keys::EXTRA_ARGS),
        }
    }

    /// Add agent identity and model
    fn add_session_args(&self, args: &mut Vec<String>) {
        if let Some(ref agent_id) = self.config.agent_id {
            args.push("--agent-mode".to_string());
            args.push(agent_id.clone());
        }

        let model = self.turn.model_override.as_ref().or(self.config.model.as_ref());
        if let Some(model) = model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
    }
}

/// Program and leading arguments for a connection
///
/// Script agents (`.js`, `.mjs`, `.cjs`) run through `node`.
///
/// # Errors
/// Returns error if `node` is required but not found
pub fn resolve_program(connection: &Connection) -> Result<(PathBuf, Vec<String>)> {
    match connection.mode {
        ConnectionMode::Hosted => Ok((locate(&connection.path_or_url), Vec::new())),
        ConnectionMode::SelfHostedServer => {
            let binary = connection.binary.as_deref().unwrap_or(DEFAULT_AGENT_BINARY);
            Ok((locate(binary), Vec::new()))
        }
        ConnectionMode::LocalBinary => {
            let path = &connection.path_or_url;
            if is_script(path) {
                let node = which::which("node").map_err(|e| {
                    OrchestraError::spawn(format!("node is required to run {path}: {e}"))
                })?;
                let mut args: Vec<String> = NODE_ARGS.iter().map(|s| (*s).to_string()).collect();
                args.push(path.clone());
                Ok((node, args))
            } else {
                Ok((PathBuf::from(path), Vec::new()))
            }
        }
    }
}

fn is_script(path: &str) -> bool {
    [".js", ".mjs", ".cjs"].iter().any(|ext| path.ends_with(ext))
}

/// Resolve a bare binary name, leaving paths untouched
fn locate(binary: &str) -> PathBuf {
    if binary.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(binary);
    }
    find_agent_binary(binary).unwrap_or_else(|| PathBuf::from(binary))
}

/// Find an agent binary on `PATH` or in common install locations
#[must_use]
pub fn find_agent_binary(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }

    let home = PathBuf::from(env::var("HOME").ok()?);
    let locations = [
        home.join(".local/bin").join(name),
        home.join(".npm-global/bin").join(name),
        home.join(".amp/bin").join(name),
        PathBuf::from("/usr/local/bin").join(name),
        PathBuf::from("/opt/homebrew/bin").join(name),
    ];
    locations.into_iter().find(|path| path.is_file())
}
