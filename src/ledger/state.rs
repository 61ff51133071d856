//! Ledger state: sessions, their threads, and the global environment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::identifiers::{AgentThreadId, SessionId, ThreadId};

/// Current snapshot format version
pub const LEDGER_VERSION: u32 = 2;

/// Name given to sessions the ledger creates on its own
pub const DEFAULT_SESSION_NAME: &str = "New session";

/// Deployment the UI is pointed at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Hosted service
    #[default]
    Production,
    /// Locally built agent
    Development,
}

/// Progress of a session's worktree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Session works in place, no worktree
    #[default]
    NotRequired,
    /// Creation requested, not finished
    Pending,
    /// Path and branch populated
    Ready,
    /// Creation failed; see `worktree_error`
    Failed,
}

/// One conversation inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Ledger thread id
    pub id: ThreadId,
    /// Display name
    pub name: String,
    /// Agent thread bound after the first successful turn
    #[serde(default)]
    pub agent_thread_id: Option<AgentThreadId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last message time
    pub last_active_at: DateTime<Utc>,
}

/// A conversational container bound to a working directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub id: SessionId,
    /// Display name
    pub name: String,
    /// Environment the session belongs to
    #[serde(default)]
    pub environment: Environment,
    /// Repository the worktree is created from
    #[serde(default)]
    pub repository_id: Option<String>,
    /// Worktree checkout path once ready
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    /// Worktree branch once ready
    #[serde(default)]
    pub worktree_branch: Option<String>,
    /// Worktree progress
    #[serde(default)]
    pub worktree_status: WorktreeStatus,
    /// Failure text when `worktree_status` is `Failed`
    #[serde(default)]
    pub worktree_error: Option<String>,
    /// Threads in creation order
    #[serde(default)]
    pub threads: Vec<Thread>,
    /// Always names a thread in `threads` when set
    #[serde(default)]
    pub active_thread_id: Option<ThreadId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time the session was used
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session with no threads
    pub fn new(
        id: SessionId,
        name: impl Into<String>,
        environment: Environment,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            environment,
            repository_id: None,
            worktree_path: None,
            worktree_branch: None,
            worktree_status: WorktreeStatus::NotRequired,
            worktree_error: None,
            threads: Vec::new(),
            active_thread_id: None,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Threads can be created unless worktree setup failed
    #[must_use]
    pub fn accepts_threads(&self) -> bool {
        self.worktree_status != WorktreeStatus::Failed
    }

    /// Look up a thread
    #[must_use]
    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    /// The active thread, if any
    #[must_use]
    pub fn active_thread(&self) -> Option<&Thread> {
        self.active_thread_id.as_ref().and_then(|id| self.thread(id))
    }
}

/// The whole ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Snapshot format version
    pub version: u32,
    /// Sessions in creation order
    pub sessions: Vec<Session>,
    /// Exactly one session is active
    pub active_session_id: SessionId,
    /// Global environment
    #[serde(default)]
    pub environment: Environment,
}

impl LedgerState {
    /// State holding one default session
    #[must_use]
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        let session = Session::new(
            session_id.clone(),
            DEFAULT_SESSION_NAME,
            Environment::default(),
            now,
        );
        Self {
            version: LEDGER_VERSION,
            sessions: vec![session],
            active_session_id: session_id,
            environment: Environment::default(),
        }
    }

    /// Look up a session
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub(super) fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    /// The active session
    #[must_use]
    pub fn active_session(&self) -> Option<&Session> {
        self.session(&self.active_session_id)
    }
}
