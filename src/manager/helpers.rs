//! Pure selection helpers over the session map

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::session::SessionEntry;
use crate::types::identifiers::SessionId;

/// Least-recently-active session that may be evicted
pub(super) fn eviction_candidate(sessions: &HashMap<SessionId, SessionEntry>) -> Option<SessionId> {
    sessions
        .values()
        .filter(|entry| entry.is_evictable())
        .min_by_key(|entry| (entry.info.last_activity, entry.activity_seq))
        .map(|entry| entry.info.id.clone())
}

/// Evictable sessions whose last activity predates `cutoff`
pub(super) fn expired_sessions(
    sessions: &HashMap<SessionId, SessionEntry>,
    cutoff: DateTime<Utc>,
) -> Vec<SessionId> {
    let mut ids: Vec<_> = sessions
        .values()
        .filter(|entry| entry.is_evictable() && entry.info.last_activity < cutoff)
        .map(|entry| entry.info.id.clone())
        .collect();
    ids.sort();
    ids
}
