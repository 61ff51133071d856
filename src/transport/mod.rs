//! Process spawn abstraction
//!
//! The orchestrator only needs a piped process: its three stdio streams,
//! a way to await the exit code, and a way to kill it. [`ProcessSpawner`]
//! is the seam tests use to script agent output without a real binary.

pub mod subprocess;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Everything needed to start one agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments after the program
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Complete environment; the child inherits nothing else
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Render the command line for logs
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Handle used to await or terminate a running process
pub trait ProcessHandle: Send {
    /// Wait for exit, yielding the exit code (`None` when killed by a signal)
    fn wait(&mut self) -> BoxFuture<'_, Result<Option<i32>>>;

    /// Begin terminating the process without waiting
    ///
    /// # Errors
    /// Returns error if the kill signal could not be delivered
    fn start_kill(&mut self) -> Result<()>;
}

/// A started process with piped stdio
pub struct SpawnedProcess {
    /// Child stdin; taken by the writer
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Child stdout
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Child stderr
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// Exit/kill handle
    pub handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts agent processes
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `spec` with piped stdin, stdout, and stderr
    ///
    /// # Errors
    /// Returns error if the program cannot be started
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess>;
}

pub use subprocess::{
    CommandBuilder, EnvironmentComposer, TokioSpawner, ensure_locale, find_agent_binary,
    resolve_program,
};
