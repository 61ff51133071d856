//! Session configuration
//!
//! This module contains the per-session configuration handed to the session
//! manager, including a builder pattern for easy configuration.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::PathBuf;

use super::identifiers::SessionId;

bitflags! {
    /// Routing behaviour toggles exported to the agent environment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionFlags: u8 {
        /// Let the agent pick a model per request
        const AUTO_ROUTE = 0b001;
        /// Run several models side by side
        const ALLOY = 0b010;
        /// Allow models from more than one provider
        const MULTI_PROVIDER = 0b100;
    }
}

impl SessionFlags {
    /// Environment variables set to `1` for each enabled flag
    #[must_use]
    pub fn env_vars(self) -> Vec<&'static str> {
        let mut vars = Vec::new();
        if self.contains(Self::AUTO_ROUTE) {
            vars.push("AMP_AUTO_ROUTE");
        }
        if self.contains(Self::ALLOY) {
            vars.push("AMP_ALLOY_MODE");
        }
        if self.contains(Self::MULTI_PROVIDER) {
            vars.push("AMP_MULTI_PROVIDER");
        }
        vars
    }
}

// Booleans on the wire so stored configs stay readable
impl Serialize for SessionFlags {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SessionFlags", 3)?;
        state.serialize_field("auto_route", &self.contains(Self::AUTO_ROUTE))?;
        state.serialize_field("alloy_mode", &self.contains(Self::ALLOY))?;
        state.serialize_field("multi_provider", &self.contains(Self::MULTI_PROVIDER))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for SessionFlags {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[allow(clippy::struct_excessive_bools)]
        struct Helper {
            #[serde(default)]
            auto_route: bool,
            #[serde(default)]
            alloy_mode: bool,
            #[serde(default)]
            multi_provider: bool,
        }

        let h = Helper::deserialize(deserializer)?;
        let mut flags = Self::empty();
        flags.set(Self::AUTO_ROUTE, h.auto_route);
        flags.set(Self::ALLOY, h.alloy_mode);
        flags.set(Self::MULTI_PROVIDER, h.multi_provider);
        Ok(flags)
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Named set of toolbox directories whose `bin/` folders join the agent's PATH
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolboxProfile {
    /// Profile name, exported as `AMP_ACTIVE_TOOLBOX_PROFILE`
    pub name: String,
    /// Toolbox roots in priority order
    pub paths: Vec<PathBuf>,
}

impl ToolboxProfile {
    /// Create a profile from its name and roots
    pub fn new(name: impl Into<String>, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration captured when a session is created and reused on restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory the agent runs in
    pub working_directory: PathBuf,
    /// Agent identity passed as `--agent-mode`
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Default model for every turn
    #[serde(default)]
    pub model: Option<String>,
    /// Routing flags
    #[serde(default)]
    pub flags: SessionFlags,
    /// Extra environment for the agent process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Toolboxes made available to the agent
    #[serde(default)]
    pub toolbox_profile: Option<ToolboxProfile>,
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`
    pub fn builder(working_directory: impl Into<PathBuf>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self {
                working_directory: working_directory.into(),
                ..Self::default()
            },
        }
    }
}

/// Builder for `SessionConfig`
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set agent identity
    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.agent_id = Some(agent_id.into());
        self
    }

    /// Set default model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Enable per-request model routing
    #[must_use]
    pub fn auto_route(mut self, enabled: bool) -> Self {
        self.config.flags.set(SessionFlags::AUTO_ROUTE, enabled);
        self
    }

    /// Enable alloy mode
    #[must_use]
    pub fn alloy_mode(mut self, enabled: bool) -> Self {
        self.config.flags.set(SessionFlags::ALLOY, enabled);
        self
    }

    /// Enable multi-provider routing
    #[must_use]
    pub fn multi_provider(mut self, enabled: bool) -> Self {
        self.config.flags.set(SessionFlags::MULTI_PROVIDER, enabled);
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Activate a toolbox profile
    #[must_use]
    pub fn toolbox_profile(mut self, profile: ToolboxProfile) -> Self {
        self.config.toolbox_profile = Some(profile);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Turn Requests
// ============================================================================

/// One user turn as seen by an orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    /// Prompt text, written to the agent's stdin
    pub prompt: String,
    /// Directory for this turn
    pub working_directory: PathBuf,
    /// Model for this turn, overriding the session default
    pub model_override: Option<String>,
}

impl TurnRequest {
    /// Create a turn request
    pub fn new(prompt: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_directory: working_directory.into(),
            model_override: None,
        }
    }
}

/// A message addressed to a managed session
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    /// Target session
    pub session_id: SessionId,
    /// Prompt text
    pub prompt: String,
    /// Directory override for this turn
    pub working_directory: Option<PathBuf>,
    /// Model override for this turn
    pub model_override: Option<String>,
}

impl SendMessageRequest {
    /// Create a request using the session's defaults
    pub fn new(session_id: impl Into<SessionId>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            working_directory: None,
            model_override: None,
        }
    }

    /// Override the working directory for this turn
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Override the model for this turn
    #[must_use]
    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }
}
