//! Counters for monitoring the session manager

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time view of manager activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Registered sessions, including initializing ones
    pub live_sessions: usize,
    /// Sessions currently marked active
    pub active_sessions: usize,
    /// Sessions that finished initializing, restarts included
    pub total_sessions_created: u64,
    /// Sessions torn down for any reason
    pub total_sessions_destroyed: u64,
    /// Turns that ended successfully
    pub total_turns_completed: u64,
    /// Turns that ended in failure
    pub total_turns_failed: u64,
    /// Mean wall-clock time of a turn, retries included
    pub average_turn_duration: Option<Duration>,
}

/// Running totals behind [`SessionMetrics`]
#[derive(Debug, Default)]
pub(super) struct MetricsRecorder {
    created: u64,
    destroyed: u64,
    completed: u64,
    failed: u64,
    turn_time: Duration,
}

impl MetricsRecorder {
    pub fn session_created(&mut self) {
        self.created += 1;
    }

    pub fn session_destroyed(&mut self) {
        self.destroyed += 1;
    }

    pub fn turn_finished(&mut self, success: bool, elapsed: Duration) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.turn_time += elapsed;
    }

    pub fn snapshot(&self, live_sessions: usize, active_sessions: usize) -> SessionMetrics {
        let turns = self.completed + self.failed;
        let average_turn_duration = u32::try_from(turns)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.turn_time / n);
        SessionMetrics {
            live_sessions,
            active_sessions,
            total_sessions_created: self.created,
            total_sessions_destroyed: self.destroyed,
            total_turns_completed: self.completed,
            total_turns_failed: self.failed,
            average_turn_duration,
        }
    }
}
