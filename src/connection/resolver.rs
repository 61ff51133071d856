//! Connection resolution policy
//!
//! Precedence for every field is explicit override, then environment, then
//! default. The mode itself is inferred when not overridden:
//!
//! 1. a local agent path (override, `AMP_CLI_PATH`, or an auto-detected
//!    checkout) selects local-binary mode, unless `AMP_BIN` was set explicitly
//!    and the path was only auto-detected
//! 2. a server URL that is not a loopback endpoint selects self-hosted mode
//! 3. anything else is hosted; a loopback `AMP_URL` left in the environment
//!    is treated as stale and stripped later

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

use crate::error::{OrchestraError, Result};
use crate::transport::subprocess::config::{DEFAULT_AGENT_BINARY, DEFAULT_LOCAL_SERVER_URL, env_keys};
use crate::transport::subprocess::is_local_endpoint;
use crate::types::connection::{Connection, ConnectionMode};

/// Explicit connection settings, typically from the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOverrides {
    /// Force a mode
    #[serde(default, rename = "connection_mode")]
    pub mode: Option<ConnectionMode>,
    /// Local agent path
    #[serde(default)]
    pub cli_path: Option<String>,
    /// Server URL
    #[serde(default)]
    pub server_url: Option<String>,
    /// API token
    #[serde(default)]
    pub token: Option<String>,
    /// Authentication command
    #[serde(default)]
    pub auth_command: Option<String>,
}

/// Turns overrides and environment into one [`Connection`]
pub trait ConnectionResolver: Send + Sync {
    /// Resolve the connection
    ///
    /// # Errors
    /// Returns `ConnectionResolution` when the inputs are inconsistent
    fn resolve(
        &self,
        overrides: &ConnectionOverrides,
        env: &HashMap<String, String>,
    ) -> Result<Connection>;
}

/// Default resolver reading `AMP_*` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvConnectionResolver {
    local_checkout: Option<PathBuf>,
}

impl EnvConnectionResolver {
    /// Resolver that also detects a local checkout at `~/amp/cli/dist/main.js`
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_checkout: dirs::home_dir().map(|home| home.join("amp/cli/dist/main.js")),
        }
    }

    /// Resolver with a specific auto-detect location, or none
    #[must_use]
    pub fn with_local_checkout(local_checkout: Option<PathBuf>) -> Self {
        Self { local_checkout }
    }

    fn detect_cli_path(
        &self,
        overrides: &ConnectionOverrides,
        env: &HashMap<String, String>,
    ) -> Option<String> {
        if let Some(path) = overrides.cli_path.clone().or_else(|| non_empty(env, env_keys::CLI_PATH)) {
            return Some(path);
        }
        if non_empty(env, env_keys::BIN).is_some() {
            return None;
        }
        self.local_checkout
            .as_ref()
            .filter(|path| path.is_file())
            .map(|path| path.display().to_string())
    }

    fn infer_mode(
        &self,
        overrides: &ConnectionOverrides,
        env: &HashMap<String, String>,
        cli_path: Option<&str>,
    ) -> ConnectionMode {
        if let Some(mode) = overrides.mode {
            return mode;
        }
        if cli_path.is_some() {
            return ConnectionMode::LocalBinary;
        }
        if overrides.server_url.is_some() {
            return ConnectionMode::SelfHostedServer;
        }
        match non_empty(env, env_keys::URL) {
            Some(url) if !is_local_endpoint(&url) => ConnectionMode::SelfHostedServer,
            _ => ConnectionMode::Hosted,
        }
    }
}

impl ConnectionResolver for EnvConnectionResolver {
    fn resolve(
        &self,
        overrides: &ConnectionOverrides,
        env: &HashMap<String, String>,
    ) -> Result<Connection> {
        let cli_path = self.detect_cli_path(overrides, env);
        let mode = self.infer_mode(overrides, env, cli_path.as_deref());
        let server_url = overrides
            .server_url
            .clone()
            .or_else(|| non_empty(env, env_keys::URL));
        let binary = non_empty(env, env_keys::BIN);

        let mut connection = match mode {
            ConnectionMode::Hosted => Connection::new(
                mode,
                binary.unwrap_or_else(|| DEFAULT_AGENT_BINARY.to_string()),
            ),
            ConnectionMode::SelfHostedServer => {
                let url = server_url.ok_or_else(|| {
                    OrchestraError::connection_resolution(
                        "self-hosted-server mode requires a server URL",
                    )
                })?;
                validate_url(&url)?;
                let mut conn = Connection::new(mode, url);
                conn.binary = binary;
                conn
            }
            ConnectionMode::LocalBinary => {
                let path = cli_path.ok_or_else(|| {
                    OrchestraError::connection_resolution(
                        "local-binary mode requires an agent path (AMP_CLI_PATH)",
                    )
                })?;
                let url = server_url.unwrap_or_else(|| DEFAULT_LOCAL_SERVER_URL.to_string());
                validate_url(&url)?;
                let mut conn = Connection::new(mode, path);
                conn.server_url = Some(url);
                conn
            }
        };

        connection.token = overrides
            .token
            .clone()
            .or_else(|| non_empty(env, env_keys::TOKEN))
            .or_else(|| non_empty(env, env_keys::API_KEY));
        connection.auth_command = overrides
            .auth_command
            .clone()
            .or_else(|| non_empty(env, env_keys::AUTH_CMD));

        log::debug!("Resolved connection: {connection:?}");
        Ok(connection)
    }
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_url(url: &str) -> Result<()> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| OrchestraError::connection_resolution(format!("invalid server URL {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn resolver() -> EnvConnectionResolver {
        EnvConnectionResolver::with_local_checkout(None)
    }

    #[test]
    fn defaults_to_hosted() {
        let conn = resolver()
            .resolve(&ConnectionOverrides::default(), &HashMap::new())
            .unwrap();
        assert_eq!(conn.mode, ConnectionMode::Hosted);
        assert_eq!(conn.path_or_url, "amp");
    }

    #[test]
    fn cli_path_selects_local_with_default_url() {
        let conn = resolver()
            .resolve(
                &ConnectionOverrides::default(),
                &env(&[("AMP_CLI_PATH", "/src/amp/cli/dist/main.js"), ("AMP_TOKEN", "t")]),
            )
            .unwrap();
        assert_eq!(conn.mode, ConnectionMode::LocalBinary);
        assert_eq!(conn.server_url(), Some("https://localhost:7002"));
        assert_eq!(conn.token.as_deref(), Some("t"));
    }

    #[test]
    fn remote_url_selects_self_hosted() {
        let conn = resolver()
            .resolve(
                &ConnectionOverrides::default(),
                &env(&[("AMP_URL", "https://amp.corp.example"), ("AMP_BIN", "/opt/amp")]),
            )
            .unwrap();
        assert_eq!(conn.mode, ConnectionMode::SelfHostedServer);
        assert_eq!(conn.binary.as_deref(), Some("/opt/amp"));
        assert!(!conn.requires_auth());
    }

    #[test]
    fn stale_loopback_url_stays_hosted() {
        let conn = resolver()
            .resolve(
                &ConnectionOverrides::default(),
                &env(&[("AMP_URL", "https://localhost:7002")]),
            )
            .unwrap();
        assert_eq!(conn.mode, ConnectionMode::Hosted);
    }

    #[test]
    fn explicit_bin_disables_auto_detect() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("main.js");
        std::fs::write(&checkout, "").unwrap();
        let resolver = EnvConnectionResolver::with_local_checkout(Some(checkout));

        let detected = resolver
            .resolve(&ConnectionOverrides::default(), &HashMap::new())
            .unwrap();
        assert_eq!(detected.mode, ConnectionMode::LocalBinary);

        let pinned = resolver
            .resolve(&ConnectionOverrides::default(), &env(&[("AMP_BIN", "amp")]))
            .unwrap();
        assert_eq!(pinned.mode, ConnectionMode::Hosted);
    }

    #[test]
    fn forced_modes_report_missing_inputs() {
        let overrides = ConnectionOverrides {
            mode: Some(ConnectionMode::SelfHostedServer),
            ..ConnectionOverrides::default()
        };
        let err = resolver().resolve(&overrides, &HashMap::new()).unwrap_err();
        assert!(matches!(err, OrchestraError::ConnectionResolution(_)));

        let overrides = ConnectionOverrides {
            server_url: Some("not a url".into()),
            ..ConnectionOverrides::default()
        };
        assert!(resolver().resolve(&overrides, &HashMap::new()).is_err());
    }
}
