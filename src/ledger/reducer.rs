//! Pure transition function for the ledger
//!
//! Actions naming an unknown session or thread, or one that is not allowed in
//! the current state, leave the state untouched.

use chrono::{DateTime, Utc};

use super::action::LedgerAction;
use super::state::{DEFAULT_SESSION_NAME, Environment, LedgerState, Session, Thread, WorktreeStatus};
use crate::types::identifiers::{SessionId, ThreadId};

/// Inputs a transition may need besides the state
///
/// Keeping the clock and id source outside makes `reduce` deterministic.
#[derive(Debug, Clone)]
pub struct ReduceContext {
    /// Timestamp for anything created or touched
    pub now: DateTime<Utc>,
    /// Id for a session or thread the transition creates
    pub minted_id: String,
}

impl ReduceContext {
    /// Context using the current time and a fresh uuid
    #[must_use]
    pub fn current() -> Self {
        Self {
            now: Utc::now(),
            minted_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Apply `action` to `state`
#[must_use]
pub fn reduce(mut state: LedgerState, action: &LedgerAction, ctx: &ReduceContext) -> LedgerState {
    let applied = match action {
        LedgerAction::CreateSession {
            name,
            repository_id,
        } => {
            let id = SessionId::new(ctx.minted_id.clone());
            let name = name
                .clone()
                .unwrap_or_else(|| format!("Session {}", state.sessions.len() + 1));
            let mut session = Session::new(id.clone(), name, state.environment, ctx.now);
            if let Some(repository_id) = repository_id {
                session.repository_id = Some(repository_id.clone());
                session.worktree_status = WorktreeStatus::Pending;
            }
            state.sessions.push(session);
            state.active_session_id = id;
            true
        }
        LedgerAction::RenameSession { session_id, name } => {
            with_session(&mut state, session_id, |s| s.name.clone_from(name))
        }
        LedgerAction::DeleteSession { session_id } => delete_session(&mut state, session_id, ctx),
        LedgerAction::SwitchSession { session_id } => match state.session_mut(session_id) {
            Some(session) => {
                session.last_active_at = ctx.now;
                let environment = session.environment;
                state.active_session_id = session_id.clone();
                state.environment = environment;
                true
            }
            None => false,
        },
        LedgerAction::WorktreePending { session_id } => with_session(&mut state, session_id, |s| {
            s.worktree_status = WorktreeStatus::Pending;
            s.worktree_error = None;
        }),
        LedgerAction::WorktreeFulfilled {
            session_id,
            path,
            branch,
        } => with_session(&mut state, session_id, |s| {
            s.worktree_status = WorktreeStatus::Ready;
            s.worktree_path = Some(path.clone());
            s.worktree_branch = Some(branch.clone());
            s.worktree_error = None;
        }),
        LedgerAction::WorktreeFailed { session_id, error } => {
            with_session(&mut state, session_id, |s| {
                s.worktree_status = WorktreeStatus::Failed;
                s.worktree_path = None;
                s.worktree_branch = None;
                s.worktree_error = Some(error.clone());
            })
        }
        LedgerAction::CreateThread { session_id, name } => {
            match state.session_mut(session_id) {
                Some(session) if session.accepts_threads() => {
                    let id = ThreadId::new(ctx.minted_id.clone());
                    let name = name
                        .clone()
                        .unwrap_or_else(|| format!("Thread {}", session.threads.len() + 1));
                    session.threads.push(Thread {
                        id: id.clone(),
                        name,
                        agent_thread_id: None,
                        created_at: ctx.now,
                        last_active_at: ctx.now,
                    });
                    session.active_thread_id = Some(id);
                    session.last_active_at = ctx.now;
                    true
                }
                Some(session) => {
                    log::debug!(
                        "Session {} cannot create threads: {}",
                        session.id,
                        session.worktree_error.as_deref().unwrap_or("worktree failed")
                    );
                    false
                }
                None => false,
            }
        }
        LedgerAction::RenameThread {
            session_id,
            thread_id,
            name,
        } => with_thread(&mut state, session_id, thread_id, |t| t.name.clone_from(name)),
        LedgerAction::DeleteThread {
            session_id,
            thread_id,
        } => with_session(&mut state, session_id, |s| {
            let before = s.threads.len();
            s.threads.retain(|t| &t.id != thread_id);
            if s.threads.len() != before && s.active_thread_id.as_ref() == Some(thread_id) {
                // Threads are kept in creation order.
                s.active_thread_id = s.threads.last().map(|t| t.id.clone());
            }
        }),
        LedgerAction::SwitchThread {
            session_id,
            thread_id,
        } => match state.session_mut(session_id) {
            Some(session) if session.thread(thread_id).is_some() => {
                session.active_thread_id = Some(thread_id.clone());
                true
            }
            _ => false,
        },
        LedgerAction::BindAgentThread {
            session_id,
            thread_id,
            agent_thread_id,
        } => with_thread(&mut state, session_id, thread_id, |t| {
            t.agent_thread_id = Some(agent_thread_id.clone());
        }),
        LedgerAction::RecordActivity {
            session_id,
            thread_id,
        } => match state.session_mut(session_id) {
            Some(session) => {
                session.last_active_at = ctx.now;
                if let Some(thread_id) = thread_id
                    && let Some(thread) = session.threads.iter_mut().find(|t| &t.id == thread_id)
                {
                    thread.last_active_at = ctx.now;
                }
                true
            }
            None => false,
        },
        LedgerAction::SwitchEnvironment { environment } => {
            switch_environment(&mut state, *environment, ctx)
        }
    };

    if !applied {
        log::debug!("Ledger ignored {} action", action.name());
    }
    state
}

fn with_session(state: &mut LedgerState, id: &SessionId, f: impl FnOnce(&mut Session)) -> bool {
    match state.session_mut(id) {
        Some(session) => {
            f(session);
            true
        }
        None => false,
    }
}

fn with_thread(
    state: &mut LedgerState,
    session_id: &SessionId,
    thread_id: &ThreadId,
    f: impl FnOnce(&mut Thread),
) -> bool {
    let thread = state
        .session_mut(session_id)
        .and_then(|s| s.threads.iter_mut().find(|t| &t.id == thread_id));
    match thread {
        Some(thread) => {
            f(thread);
            true
        }
        None => false,
    }
}

fn delete_session(state: &mut LedgerState, id: &SessionId, ctx: &ReduceContext) -> bool {
    let before = state.sessions.len();
    state.sessions.retain(|s| &s.id != id);
    if state.sessions.len() == before {
        return false;
    }
    if &state.active_session_id == id {
        promote_or_synthesize(state, ctx);
    }
    true
}

fn switch_environment(state: &mut LedgerState, environment: Environment, ctx: &ReduceContext) -> bool {
    if state.environment == environment {
        return false;
    }
    state.environment = environment;
    let active_matches = state
        .active_session()
        .is_some_and(|s| s.environment == environment);
    if !active_matches {
        promote_or_synthesize(state, ctx);
    }
    true
}

/// Make the most recently active session of the current environment active,
/// creating a default one when there is none
fn promote_or_synthesize(state: &mut LedgerState, ctx: &ReduceContext) {
    let environment = state.environment;
    let promoted = state
        .sessions
        .iter()
        .filter(|s| s.environment == environment)
        .max_by_key(|s| s.last_active_at)
        .map(|s| s.id.clone());

    state.active_session_id = match promoted {
        Some(id) => id,
        None => {
            let id = SessionId::new(ctx.minted_id.clone());
            state.sessions.push(Session::new(
                id.clone(),
                DEFAULT_SESSION_NAME,
                environment,
                ctx.now,
            ));
            id
        }
    };
}
