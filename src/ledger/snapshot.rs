//! Versioned on-disk snapshots of the ledger
//!
//! Snapshots written by this build carry `version: 2`. Version 1 snapshots
//! kept a single `thread_id` per session; loading one lifts it into a
//! one-element thread list. Agent thread ids that do not match the current
//! `T-<uuid>` scheme are cleared so the thread is recreated on its next turn.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::state::{
    DEFAULT_SESSION_NAME, Environment, LEDGER_VERSION, LedgerState, Session, Thread,
    WorktreeStatus,
};
use crate::error::{OrchestraError, Result};
use crate::types::identifiers::{AgentThreadId, SessionId, ThreadId};

/// Session layout of version 1 snapshots
#[derive(Debug, Deserialize)]
struct SessionV1 {
    id: SessionId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    environment: Environment,
    #[serde(default)]
    repository_id: Option<String>,
    #[serde(default)]
    worktree_path: Option<PathBuf>,
    #[serde(default)]
    worktree_branch: Option<String>,
    #[serde(default)]
    worktree_error: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LedgerV1 {
    #[serde(default)]
    sessions: Vec<SessionV1>,
    #[serde(default)]
    active_session_id: Option<SessionId>,
    #[serde(default)]
    environment: Environment,
}

/// Decode a snapshot of any supported version
///
/// # Errors
/// Returns `UnsupportedSnapshotVersion` for snapshots from a newer build and
/// `JsonDecode` when the content does not match its version's layout
pub fn decode(raw: Value, now: DateTime<Utc>) -> Result<LedgerState> {
    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .map_or(Ok(1), u32::try_from)
        .map_err(|_| OrchestraError::snapshot("snapshot version out of range"))?;

    let state = match version {
        v if v > LEDGER_VERSION => {
            return Err(OrchestraError::UnsupportedSnapshotVersion {
                found: v,
                supported: LEDGER_VERSION,
            });
        }
        0 | 1 => {
            log::info!("Migrating ledger snapshot from version {version}");
            migrate_v1(serde_json::from_value(raw)?, now)
        }
        _ => serde_json::from_value(raw)?,
    };
    Ok(normalize(state, now))
}

fn migrate_v1(legacy: LedgerV1, now: DateTime<Utc>) -> LedgerState {
    let sessions = legacy
        .sessions
        .into_iter()
        .map(|old| {
            let created_at = old.created_at.unwrap_or(now);
            let last_active_at = old.last_active_at.unwrap_or(created_at);
            let threads: Vec<Thread> = old
                .thread_id
                .filter(|id| !id.trim().is_empty())
                .map(|id| Thread {
                    id: ThreadId::generate(),
                    name: "Thread 1".to_string(),
                    agent_thread_id: Some(AgentThreadId::new(id)),
                    created_at,
                    last_active_at,
                })
                .into_iter()
                .collect();

            let worktree_status = if old.worktree_error.is_some() {
                WorktreeStatus::Failed
            } else if old.worktree_path.is_some() {
                WorktreeStatus::Ready
            } else if old.repository_id.is_some() {
                WorktreeStatus::Pending
            } else {
                WorktreeStatus::NotRequired
            };

            Session {
                active_thread_id: threads.first().map(|t| t.id.clone()),
                threads,
                name: old.name.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
                id: old.id,
                environment: old.environment,
                repository_id: old.repository_id,
                worktree_path: old.worktree_path,
                worktree_branch: old.worktree_branch,
                worktree_status,
                worktree_error: old.worktree_error,
                created_at,
                last_active_at,
            }
        })
        .collect();

    LedgerState {
        version: LEDGER_VERSION,
        sessions,
        active_session_id: legacy.active_session_id.unwrap_or_else(|| SessionId::new("")),
        environment: legacy.environment,
    }
}

/// Restore the structural invariants on a decoded state
fn normalize(mut state: LedgerState, now: DateTime<Utc>) -> LedgerState {
    state.version = LEDGER_VERSION;

    for session in &mut state.sessions {
        for thread in &mut session.threads {
            if let Some(ref agent_id) = thread.agent_thread_id
                && !agent_id.is_current_scheme()
            {
                log::info!(
                    "Clearing legacy agent thread id {agent_id} in session {}",
                    session.id
                );
                thread.agent_thread_id = None;
            }
        }
        let active_valid = session
            .active_thread_id
            .as_ref()
            .is_none_or(|id| session.thread(id).is_some());
        if !active_valid {
            session.active_thread_id = session.threads.last().map(|t| t.id.clone());
        }
    }

    if state.session(&state.active_session_id).is_none() {
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
                let id = SessionId::generate();
                state
                    .sessions
                    .push(Session::new(id.clone(), DEFAULT_SESSION_NAME, environment, now));
                id
            }
        };
    }
    state
}

/// Reads and writes ledger snapshots at one path
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform data directory
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("agent-orchestra").join("ledger.json"))
    }

    /// Path of the snapshot file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, `None` if none was written yet
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or decoded
    pub fn load(&self) -> Result<Option<LedgerState>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_slice(&raw)?;
        decode(value, Utc::now()).map(Some)
    }

    /// Write `state` atomically
    ///
    /// The snapshot is written to a sibling temp file and renamed over the
    /// target, so readers never observe a partial file.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be written
    pub fn save(&self, state: &LedgerState) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| OrchestraError::snapshot("snapshot path has no file name"))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp = parent.join(tmp_name);

        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            OrchestraError::snapshot(format!(
                "failed to replace {}: {e}",
                self.path.display()
            ))
        })?;
        log::debug!("Saved ledger snapshot to {}", self.path.display());
        Ok(())
    }
}
