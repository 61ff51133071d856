//! Events published by the session manager

use serde::{Deserialize, Serialize};

use crate::types::events::StreamingEvent;
use crate::types::identifiers::SessionId;

/// Why a session went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    /// Caller asked for it
    Requested,
    /// Made room for a new session
    Evicted,
    /// Idle past the cleanup cutoff
    Expired,
    /// Rebuilt after a connection change
    Restarted,
    /// Manager shutdown
    Shutdown,
}

/// One notification on the manager's event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Session initialized and registered
    Created {
        /// Session id
        session_id: SessionId,
    },
    /// Agent output for a session
    Stream {
        /// Session id
        session_id: SessionId,
        /// Decoded event
        event: StreamingEvent,
    },
    /// A turn finished unsuccessfully
    Error {
        /// Session id
        session_id: SessionId,
        /// Error text from the turn
        message: String,
    },
    /// Session removed
    Destroyed {
        /// Session id
        session_id: SessionId,
        /// Cause
        reason: DestroyReason,
    },
}

impl SessionEvent {
    /// Session this event belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Created { session_id }
            | Self::Stream { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Destroyed { session_id, .. } => session_id,
        }
    }

    /// The wrapped agent event, for `Stream`
    #[must_use]
    pub fn stream_event(&self) -> Option<&StreamingEvent> {
        match self {
            Self::Stream { event, .. } => Some(event),
            _ => None,
        }
    }
}
