//! The closed set of ledger transitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::state::Environment;
use crate::types::identifiers::{AgentThreadId, SessionId, ThreadId};

/// Every change the ledger accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerAction {
    /// Create a session and make it active
    ///
    /// A session with a repository starts with its worktree pending.
    CreateSession {
        /// Display name; numbered automatically when absent
        name: Option<String>,
        /// Repository to create a worktree from
        repository_id: Option<String>,
    },
    /// Rename a session
    RenameSession {
        /// Target session
        session_id: SessionId,
        /// New display name
        name: String,
    },
    /// Delete a session, promoting another if it was active
    DeleteSession {
        /// Target session
        session_id: SessionId,
    },
    /// Make a session active
    SwitchSession {
        /// Target session
        session_id: SessionId,
    },
    /// Worktree creation started (or restarted after a failure)
    WorktreePending {
        /// Target session
        session_id: SessionId,
    },
    /// Worktree created
    WorktreeFulfilled {
        /// Target session
        session_id: SessionId,
        /// Checkout directory
        path: PathBuf,
        /// Checked-out branch
        branch: String,
    },
    /// Worktree creation failed; the session stays
    WorktreeFailed {
        /// Target session
        session_id: SessionId,
        /// Failure text shown on the session
        error: String,
    },
    /// Create a thread and make it the session's active thread
    CreateThread {
        /// Target session
        session_id: SessionId,
        /// Display name; numbered automatically when absent
        name: Option<String>,
    },
    /// Rename a thread
    RenameThread {
        /// Target session
        session_id: SessionId,
        /// Target thread
        thread_id: ThreadId,
        /// New display name
        name: String,
    },
    /// Delete a thread, reassigning the active one if needed
    DeleteThread {
        /// Target session
        session_id: SessionId,
        /// Target thread
        thread_id: ThreadId,
    },
    /// Make a thread the active one
    SwitchThread {
        /// Target session
        session_id: SessionId,
        /// Target thread
        thread_id: ThreadId,
    },
    /// Attach the agent's thread identifier after its first turn
    BindAgentThread {
        /// Target session
        session_id: SessionId,
        /// Target thread
        thread_id: ThreadId,
        /// Identifier reported by the agent
        agent_thread_id: AgentThreadId,
    },
    /// Bump last-active times
    RecordActivity {
        /// Target session
        session_id: SessionId,
        /// Thread to bump as well
        thread_id: Option<ThreadId>,
    },
    /// Switch the global environment
    SwitchEnvironment {
        /// Environment to switch to
        environment: Environment,
    },
}

impl LedgerAction {
    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::RenameSession { .. } => "rename_session",
            Self::DeleteSession { .. } => "delete_session",
            Self::SwitchSession { .. } => "switch_session",
            Self::WorktreePending { .. } => "worktree_pending",
            Self::WorktreeFulfilled { .. } => "worktree_fulfilled",
            Self::WorktreeFailed { .. } => "worktree_failed",
            Self::CreateThread { .. } => "create_thread",
            Self::RenameThread { .. } => "rename_thread",
            Self::DeleteThread { .. } => "delete_thread",
            Self::SwitchThread { .. } => "switch_thread",
            Self::BindAgentThread { .. } => "bind_agent_thread",
            Self::RecordActivity { .. } => "record_activity",
            Self::SwitchEnvironment { .. } => "switch_environment",
        }
    }
}
