//! Turn outcome

use serde::{Deserialize, Serialize};

use super::events::StreamingEvent;
use super::identifiers::AgentThreadId;
use crate::error::{OrchestraError, Result};

/// Outcome of one user turn, after retries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// True when the final attempt exited with code zero
    pub success: bool,
    /// Agent thread identifier seen during the turn
    pub thread_id: Option<AgentThreadId>,
    /// Captured stderr or a synthesized exit message on failure
    pub error: Option<String>,
    /// Every event emitted across all attempts, in order
    pub events: Vec<StreamingEvent>,
    /// Number of process invocations made
    pub attempts: u32,
    /// Exit code of the final attempt, `None` if it never exited normally
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Standard error of the final attempt, when it wrote any
    #[serde(default)]
    pub stderr: Option<String>,
}

impl OrchestrationResult {
    /// Turn a failed result into [`OrchestraError::Process`]
    ///
    /// # Errors
    /// Returns `Process` carrying the error text, exit code and stderr of the
    /// final attempt when the turn did not succeed
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let message = self.error.unwrap_or_else(|| "turn failed".to_string());
        Err(OrchestraError::process(message, self.exit_code, self.stderr))
    }

    /// Error text if this result is a failure with something to report
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        if self.success {
            return None;
        }
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }
}
