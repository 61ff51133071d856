//! Session and thread ledger
//!
//! The ledger records which sessions exist, the threads inside them and which
//! of each is active. It is driven entirely by [`LedgerAction`]s passed
//! through the pure [`reduce`] function and knows nothing about running
//! processes. [`Ledger`] wraps the state with a clock, an id source and an
//! optional [`SnapshotStore`].

mod action;
mod reducer;
mod snapshot;
mod state;
mod worktree;

use chrono::Utc;
use std::path::Path;

use crate::error::Result;
use crate::types::identifiers::{SessionId, ThreadId};
use crate::types::result::OrchestrationResult;

pub use action::LedgerAction;
pub use reducer::{ReduceContext, reduce};
pub use snapshot::{SnapshotStore, decode};
pub use state::{
    DEFAULT_SESSION_NAME, Environment, LEDGER_VERSION, LedgerState, Session, Thread,
    WorktreeStatus,
};
pub use worktree::{WorktreeInfo, WorktreeProvider};

/// Ledger state with persistence
#[derive(Debug, Clone)]
pub struct Ledger {
    state: LedgerState,
    store: Option<SnapshotStore>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// In-memory ledger holding one default session
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(LedgerState::new(SessionId::generate(), Utc::now()))
    }

    /// In-memory ledger starting from `state`
    #[must_use]
    pub fn with_state(state: LedgerState) -> Self {
        Self { state, store: None }
    }

    /// Load from `store`, or start fresh if nothing was saved
    ///
    /// Every later dispatch is written back to the store.
    ///
    /// # Errors
    /// Returns error if an existing snapshot cannot be read or is from a
    /// newer version
    pub fn open(store: SnapshotStore) -> Result<Self> {
        let state = match store.load()? {
            Some(state) => state,
            None => {
                log::info!("No ledger at {}; starting fresh", store.path().display());
                LedgerState::new(SessionId::generate(), Utc::now())
            }
        };
        Ok(Self {
            state,
            store: Some(store),
        })
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Apply an action and persist the result
    pub fn dispatch(&mut self, action: LedgerAction) -> &LedgerState {
        let ctx = ReduceContext::current();
        self.state = reduce(self.state.clone(), &action, &ctx);
        if let Err(e) = self.save() {
            log::warn!("Failed to persist ledger after {}: {e}", action.name());
        }
        &self.state
    }

    /// Write the current state to the store, if any
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be written
    pub fn save(&self) -> Result<()> {
        match self.store {
            Some(ref store) => store.save(&self.state),
            None => Ok(()),
        }
    }

    /// Active thread of `session_id`, creating one if the session has none
    ///
    /// Returns `None` for unknown sessions and for sessions whose worktree
    /// failed.
    pub fn ensure_thread(&mut self, session_id: &SessionId) -> Option<ThreadId> {
        let session = self.state.session(session_id)?;
        if let Some(thread) = session.active_thread() {
            return Some(thread.id.clone());
        }
        if !session.accepts_threads() {
            return None;
        }
        self.dispatch(LedgerAction::CreateThread {
            session_id: session_id.clone(),
            name: None,
        });
        self.state
            .session(session_id)
            .and_then(Session::active_thread)
            .map(|t| t.id.clone())
    }

    /// Record a finished turn on a thread
    ///
    /// Binds the agent thread id the first time one is reported.
    pub fn record_turn(
        &mut self,
        session_id: &SessionId,
        thread_id: &ThreadId,
        result: &OrchestrationResult,
    ) {
        let unbound = self
            .state
            .session(session_id)
            .and_then(|s| s.thread(thread_id))
            .is_some_and(|t| t.agent_thread_id.is_none());
        if unbound
            && result.success
            && let Some(ref agent_thread_id) = result.thread_id
        {
            self.dispatch(LedgerAction::BindAgentThread {
                session_id: session_id.clone(),
                thread_id: thread_id.clone(),
                agent_thread_id: agent_thread_id.clone(),
            });
        }
        self.dispatch(LedgerAction::RecordActivity {
            session_id: session_id.clone(),
            thread_id: Some(thread_id.clone()),
        });
    }

    /// Create the worktree for `session_id` and record the outcome
    ///
    /// # Errors
    /// Returns the provider's error after recording it on the session
    pub async fn provision_worktree(
        &mut self,
        session_id: &SessionId,
        repo_path: &Path,
        provider: &dyn WorktreeProvider,
    ) -> Result<()> {
        self.dispatch(LedgerAction::WorktreePending {
            session_id: session_id.clone(),
        });
        match provider.create_worktree(repo_path, session_id).await {
            Ok(info) => {
                log::info!(
                    "Worktree for session {session_id} ready at {} ({})",
                    info.path.display(),
                    info.branch
                );
                self.dispatch(LedgerAction::WorktreeFulfilled {
                    session_id: session_id.clone(),
                    path: info.path,
                    branch: info.branch,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("Worktree for session {session_id} failed: {e}");
                self.dispatch(LedgerAction::WorktreeFailed {
                    session_id: session_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Delete a session, removing its worktree first when it has one
    ///
    /// A removal failure is logged; the session is deleted regardless.
    pub async fn delete_session(
        &mut self,
        session_id: &SessionId,
        provider: Option<&dyn WorktreeProvider>,
    ) {
        let checkout = self.state.session(session_id).and_then(|s| {
            s.worktree_path
                .clone()
                .zip(s.worktree_branch.clone())
        });
        if let (Some(provider), Some((path, branch))) = (provider, checkout)
            && let Err(e) = provider.remove_worktree(&path, &branch, true).await
        {
            log::warn!("Failed to remove worktree {}: {e}", path.display());
        }
        self.dispatch(LedgerAction::DeleteSession {
            session_id: session_id.clone(),
        });
    }
}
