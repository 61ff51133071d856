//! Resolved connection types
//!
//! A [`Connection`] is immutable for the lifetime of one orchestrator. When
//! connection-relevant configuration changes, every session is rebuilt
//! against a freshly resolved value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the external agent is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// Installed agent binary talking to the hosted service
    Hosted,
    /// Installed agent binary pointed at a self-hosted server URL
    SelfHostedServer,
    /// Locally built agent (a script or binary on disk)
    LocalBinary,
}

impl ConnectionMode {
    /// Wire name of the mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::SelfHostedServer => "self-hosted-server",
            Self::LocalBinary => "local-binary",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved connection target
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Invocation mode
    pub mode: ConnectionMode,
    /// Binary path for hosted/local modes, server URL for self-hosted mode
    pub path_or_url: String,
    /// Binary to run in self-hosted mode (defaults to the hosted binary)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Server URL used by a local binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// API token exported to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shell command run before the version probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_command: Option<String>,
}

impl Connection {
    /// Create a connection with only mode and target set
    pub fn new(mode: ConnectionMode, path_or_url: impl Into<String>) -> Self {
        Self {
            mode,
            path_or_url: path_or_url.into(),
            binary: None,
            server_url: None,
            token: None,
            auth_command: None,
        }
    }

    /// Every mode except the self-hosted server authenticates through the CLI
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.mode != ConnectionMode::SelfHostedServer
    }

    /// Server URL the agent should talk to, if the mode has one
    #[must_use]
    pub fn server_url(&self) -> Option<&str> {
        match self.mode {
            ConnectionMode::Hosted => None,
            ConnectionMode::SelfHostedServer => Some(&self.path_or_url),
            ConnectionMode::LocalBinary => self.server_url.as_deref(),
        }
    }

    /// Human-readable description used in connection-info events
    #[must_use]
    pub fn description(&self) -> String {
        match self.mode {
            ConnectionMode::Hosted => "Production mode".to_string(),
            ConnectionMode::SelfHostedServer => {
                format!("Self-hosted server at {}", self.path_or_url)
            }
            ConnectionMode::LocalBinary => format!("Development mode ({})", self.path_or_url),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("mode", &self.mode)
            .field("path_or_url", &self.path_or_url)
            .field("binary", &self.binary)
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("auth_command", &self.auth_command)
            .finish()
    }
}
