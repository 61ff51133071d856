//! Retry policy and failure classification
//!
//! Classification is a heuristic over free-text error messages. It assumes
//! the agent reports errors in English; the child locale is pinned for that
//! reason (see `ensure_locale`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Substrings marking an authentication failure
const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "invalid token",
    "invalid api key",
    "forbidden",
    "401",
];

/// Substrings marking a transient network failure
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "econnreset",
    "connection reset",
    "econnrefused",
    "connection refused",
    "socket hang up",
];

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected; re-probe before retrying
    Auth,
    /// Network hiccup; back off and retry
    Transient,
    /// Anything else; stop
    Fatal,
}

/// Classify error text, case-insensitively
///
/// Authentication patterns win over transient ones when both appear.
#[must_use]
pub fn classify(error_text: &str) -> ErrorClass {
    let lower = error_text.to_lowercase();
    if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Auth
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Bounded attempts with an indexed backoff schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before attempt `n + 1`, indexed by `n - 1`; the last entry repeats
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![500, 1500],
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: Vec::new(),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let ms = self
            .backoff_ms
            .get(idx)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Whether another attempt may follow attempt number `attempt`
    #[must_use]
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}
