//! Integration tests for the session/thread ledger
//!
//! Drives the `Ledger` wrapper with a scripted worktree provider and an
//! on-disk snapshot store.

mod common;

use agent_orchestra::ledger::{
    Ledger, LedgerAction, SnapshotStore, WorktreeInfo, WorktreeProvider, WorktreeStatus,
};
use agent_orchestra::{
    AgentThreadId, OrchestraError, OrchestrationResult, Result, SessionId,
};
use common::THREAD_A;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Worktree provider that succeeds or fails on demand and records removals
struct FakeWorktrees {
    fail_with: Option<String>,
    removed: Mutex<Vec<(PathBuf, String, bool)>>,
}

impl FakeWorktrees {
    fn working() -> Self {
        Self {
            fail_with: None,
            removed: Mutex::new(Vec::new()),
        }
    }

    fn broken(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl WorktreeProvider for FakeWorktrees {
    fn create_worktree<'a>(
        &'a self,
        repo_path: &'a Path,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<WorktreeInfo>> {
        Box::pin(async move {
            if let Some(ref message) = self.fail_with {
                return Err(OrchestraError::worktree(message.clone()));
            }
            Ok(WorktreeInfo {
                path: repo_path.join(".worktrees").join(session_id.as_str()),
                branch: format!("session/{session_id}"),
            })
        })
    }

    fn remove_worktree<'a>(
        &'a self,
        path: &'a Path,
        branch: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.removed
                .lock()
                .push((path.to_path_buf(), branch.to_string(), force));
            Ok(())
        })
    }
}

fn create_repo_session(ledger: &mut Ledger) -> SessionId {
    ledger.dispatch(LedgerAction::CreateSession {
        name: Some("feature".to_string()),
        repository_id: Some("repo".to_string()),
    });
    ledger.state().active_session_id.clone()
}

#[tokio::test]
async fn test_worktree_fulfilment_populates_session() {
    let mut ledger = Ledger::new();
    let id = create_repo_session(&mut ledger);
    assert_eq!(
        ledger.state().session(&id).unwrap().worktree_status,
        WorktreeStatus::Pending
    );

    let provider = FakeWorktrees::working();
    ledger
        .provision_worktree(&id, Path::new("/repo"), &provider)
        .await
        .unwrap();

    let session = ledger.state().session(&id).unwrap();
    assert_eq!(session.worktree_status, WorktreeStatus::Ready);
    assert_eq!(
        session.worktree_path,
        Some(PathBuf::from("/repo/.worktrees").join(id.as_str()))
    );
    assert!(ledger.ensure_thread(&id).is_some());
}

#[tokio::test]
async fn test_worktree_failure_keeps_session_but_blocks_threads() {
    let mut ledger = Ledger::new();
    let id = create_repo_session(&mut ledger);

    let provider = FakeWorktrees::broken("branch already exists");
    let err = ledger
        .provision_worktree(&id, Path::new("/repo"), &provider)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestraError::Worktree(_)));

    let session = ledger.state().session(&id).unwrap();
    assert_eq!(session.worktree_status, WorktreeStatus::Failed);
    assert!(session
        .worktree_error
        .as_deref()
        .is_some_and(|e| e.contains("branch already exists")));
    assert_eq!(ledger.ensure_thread(&id), None);
    assert!(ledger.state().session(&id).unwrap().threads.is_empty());
}

#[tokio::test]
async fn test_deleting_session_removes_its_worktree() {
    let mut ledger = Ledger::new();
    let id = create_repo_session(&mut ledger);
    let provider = FakeWorktrees::working();
    ledger
        .provision_worktree(&id, Path::new("/repo"), &provider)
        .await
        .unwrap();

    ledger
        .delete_session(&id, Some(&provider as &dyn WorktreeProvider))
        .await;

    assert!(ledger.state().session(&id).is_none());
    assert!(ledger.state().active_session().is_some());
    let removed = provider.removed.lock();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].1, format!("session/{id}"));
    assert!(removed[0].2);
}

#[test]
fn test_first_message_creates_thread_and_binds_agent_id() {
    let mut ledger = Ledger::new();
    let session_id = ledger.state().active_session_id.clone();

    let thread_id = ledger.ensure_thread(&session_id).unwrap();
    assert_eq!(ledger.ensure_thread(&session_id), Some(thread_id.clone()));

    let result = OrchestrationResult {
        success: true,
        thread_id: Some(AgentThreadId::new(THREAD_A)),
        ..OrchestrationResult::default()
    };
    ledger.record_turn(&session_id, &thread_id, &result);

    let session = ledger.state().session(&session_id).unwrap();
    assert_eq!(session.threads.len(), 1);
    assert_eq!(
        session.active_thread().unwrap().agent_thread_id,
        Some(AgentThreadId::new(THREAD_A))
    );
}

#[test]
fn test_ledger_persists_every_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let (session_id, thread_id) = {
        let mut ledger = Ledger::open(SnapshotStore::new(&path)).unwrap();
        let session_id = ledger.state().active_session_id.clone();
        let thread_id = ledger.ensure_thread(&session_id).unwrap();
        ledger.dispatch(LedgerAction::RenameThread {
            session_id: session_id.clone(),
            thread_id: thread_id.clone(),
            name: "Refactor parser".to_string(),
        });
        (session_id, thread_id)
    };

    let reopened = Ledger::open(SnapshotStore::new(&path)).unwrap();
    let session = reopened.state().session(&session_id).unwrap();
    assert_eq!(session.active_thread_id, Some(thread_id));
    assert_eq!(session.threads[0].name, "Refactor parser");
}

#[test]
fn test_legacy_snapshot_is_migrated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"version":1,"sessions":[
                {{"id":"old","name":"Old work","thread_id":"{THREAD_A}"}},
                {{"id":"older","name":"Ancient","thread_id":"thread_12345"}}
            ],"active_session_id":"old"}}"#
        ),
    )
    .unwrap();

    let ledger = Ledger::open(SnapshotStore::new(&path)).unwrap();
    let state = ledger.state();
    assert_eq!(state.version, agent_orchestra::ledger::LEDGER_VERSION);

    let current = state.session(&SessionId::new("old")).unwrap();
    assert_eq!(
        current.active_thread().unwrap().agent_thread_id,
        Some(AgentThreadId::new(THREAD_A))
    );
    let legacy = state.session(&SessionId::new("older")).unwrap();
    assert_eq!(legacy.threads.len(), 1);
    assert_eq!(legacy.threads[0].agent_thread_id, None);
}

#[test]
fn test_snapshot_from_newer_build_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(&path, r#"{"version":99,"sessions":[]}"#).unwrap();

    let err = Ledger::open(SnapshotStore::new(&path)).unwrap_err();
    assert!(matches!(
        err,
        OrchestraError::UnsupportedSnapshotVersion { found: 99, .. }
    ));
}
