//! Session state structures
//!
//! Defines the record the manager keeps for each live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::client::ProcessOrchestrator;
use crate::types::events::StreamingEvent;
use crate::types::identifiers::{AgentThreadId, SessionId};
use crate::types::options::SessionConfig;

/// Lifecycle of a managed session
///
/// `Initializing → Active ⇄ Inactive → Destroyed`; `Failed` is reachable
/// only from `Initializing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Orchestrator is probing authentication
    Initializing,
    /// In use by the UI
    Active,
    /// Idle and eligible for eviction
    Inactive,
    /// Torn down
    Destroyed,
    /// Initialization failed
    Failed,
}

/// Public snapshot of a managed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Agent thread, set after the first successful turn
    pub thread_id: Option<AgentThreadId>,
    /// Directory turns run in unless overridden
    pub working_directory: PathBuf,
    /// Configuration used to (re)create the session
    pub config: SessionConfig,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the most recent turn or activation
    pub last_activity: DateTime<Utc>,
    /// Whether the UI considers the session active
    pub is_active: bool,
    /// Held active by `activate_session` until deactivated
    #[serde(default)]
    pub pinned: bool,
    /// Lifecycle state
    pub state: SessionState,
}

impl SessionInfo {
    pub(super) fn new(id: SessionId, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            thread_id: None,
            working_directory: config.working_directory.clone(),
            config,
            created_at: now,
            last_activity: now,
            is_active: false,
            pinned: false,
            state: SessionState::Initializing,
        }
    }
}

/// Manager-internal record for one session
pub(super) struct SessionEntry {
    pub info: SessionInfo,
    /// Monotonic stamp of the last touch; breaks `last_activity` ties
    pub activity_seq: u64,
    pub orchestrator: Arc<ProcessOrchestrator>,
    pub session_tx: broadcast::Sender<StreamingEvent>,
    pub in_flight: Arc<AtomicUsize>,
}

impl SessionEntry {
    /// A turn is running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Eligible for eviction or idle cleanup
    pub fn is_evictable(&self) -> bool {
        !self.info.is_active && self.info.state == SessionState::Inactive && !self.is_busy()
    }

    pub fn touch(&mut self, seq: u64) {
        self.info.last_activity = Utc::now();
        self.activity_seq = seq;
    }

    pub fn set_active(&mut self, active: bool) {
        self.info.is_active = active;
        self.info.state = if active {
            SessionState::Active
        } else {
            SessionState::Inactive
        };
    }

    /// Settle the state once no turn is running
    ///
    /// Sessions are active while a turn is in flight; afterwards only a
    /// pinned session stays active.
    pub fn finish_turn(&mut self) {
        if !self.is_busy() {
            self.set_active(self.info.pinned);
        }
    }

    /// Stop the orchestrator; queued events still drain to subscribers
    pub fn teardown(mut self) -> SessionInfo {
        self.orchestrator.shutdown();
        self.info.state = SessionState::Destroyed;
        self.info.is_active = false;
        self.info
    }
}

/// Counts a turn as in flight until dropped
pub(super) struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
