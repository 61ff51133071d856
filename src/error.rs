//! Error types for the agent orchestrator

use thiserror::Error;

/// Main error type for session orchestration
#[derive(Error, Debug)]
pub enum OrchestraError {
    /// The connection could not be resolved from overrides and environment
    #[error("Connection resolution failed: {0}")]
    ConnectionResolution(String),

    /// The authentication probe failed or the agent rejected credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The agent binary could not be started
    #[error("Failed to spawn agent process: {0}")]
    Spawn(String),

    /// Process execution error with exit code and stderr
    #[error("Process error (exit code {exit_code:?}): {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code, `None` when killed by a signal
        exit_code: Option<i32>,
        /// Standard error output
        stderr: Option<String>,
    },

    /// JSON decode error
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but its orchestrator has not finished initializing
    #[error("Session {0} is not ready")]
    SessionNotReady(String),

    /// Session capacity reached and no inactive session can be evicted
    #[error("Maximum sessions reached ({0}) and no inactive session can be evicted")]
    CapacityReached(usize),

    /// Snapshot version newer than this build understands
    #[error("Unsupported snapshot version {found} (latest supported is {supported})")]
    UnsupportedSnapshotVersion {
        /// Version found in the snapshot
        found: u32,
        /// Latest version this build can read
        supported: u32,
    },

    /// Snapshot could not be read or written
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Worktree collaborator failure
    #[error("Worktree error: {0}")]
    Worktree(String),

    /// The operation was cancelled because its session was destroyed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestraError>;

impl OrchestraError {
    /// Create a connection resolution error
    pub fn connection_resolution(msg: impl Into<String>) -> Self {
        Self::ConnectionResolution(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: Option<i32>, stderr: Option<String>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            stderr,
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }

    /// Create a session not ready error
    pub fn session_not_ready(id: impl Into<String>) -> Self {
        Self::SessionNotReady(id.into())
    }

    /// Create a snapshot error
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    /// Create a worktree error
    pub fn worktree(msg: impl Into<String>) -> Self {
        Self::Worktree(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// True for errors raised because no session could be placed
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityReached(_))
    }
}
