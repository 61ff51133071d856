//! Worktree collaborator seam

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::identifiers::SessionId;

/// A checkout created for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Checkout directory
    pub path: PathBuf,
    /// Branch checked out there
    pub branch: String,
}

/// Creates and removes per-session checkouts
///
/// Both operations may be slow and may fail; the ledger records a failure on
/// the session instead of removing it.
pub trait WorktreeProvider: Send + Sync {
    /// Create a checkout of `repo_path` for `session_id`
    fn create_worktree<'a>(
        &'a self,
        repo_path: &'a Path,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<WorktreeInfo>>;

    /// Remove a checkout and its branch
    fn remove_worktree<'a>(
        &'a self,
        path: &'a Path,
        branch: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<()>>;
}
