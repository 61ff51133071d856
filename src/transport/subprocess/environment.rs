//! Child environment composition
//!
//! Layers, lowest precedence first: inherited process environment, caller
//! environment, session flags, toolbox profile, connection-derived values.
//! The result is then sanitized for the resolved mode.

use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::types::connection::{Connection, ConnectionMode};
use crate::types::options::{SessionFlags, ToolboxProfile};

use super::config::{LOCAL_ENDPOINT_VARS, PINNED_LOCALE, env_keys};

/// Builds the full environment for one connection
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentComposer<'a> {
    connection: &'a Connection,
    toolbox_profile: Option<&'a ToolboxProfile>,
}

impl<'a> EnvironmentComposer<'a> {
    /// Create a composer for `connection`
    #[must_use]
    pub fn new(connection: &'a Connection) -> Self {
        Self {
            connection,
            toolbox_profile: None,
        }
    }

    /// Export `profile` and put its toolboxes on PATH
    #[must_use]
    pub fn toolbox_profile(mut self, profile: Option<&'a ToolboxProfile>) -> Self {
        self.toolbox_profile = profile;
        self
    }

    /// Merge and sanitize
    ///
    /// # Arguments
    /// * `inherited` - Host process environment
    /// * `caller` - Session and configuration supplied variables
    /// * `flags` - Session routing flags
    pub fn compose(
        &self,
        inherited: impl IntoIterator<Item = (String, String)>,
        caller: &HashMap<String, String>,
        flags: SessionFlags,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = inherited.into_iter().collect();
        env.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
        for key in flags.env_vars() {
            env.insert(key.to_string(), "1".to_string());
        }

        self.apply_toolboxes(&mut env);
        self.apply_connection(&mut env);
        ensure_locale(&mut env);
        env
    }

    fn apply_toolboxes(&self, env: &mut HashMap<String, String>) {
        if let Some(profile) = self.toolbox_profile {
            let joined = profile
                .paths
                .iter()
                .map(|p| p.to_string_lossy())
                .collect::<Vec<_>>()
                .join(PATH_SEPARATOR);
            env.insert(env_keys::TOOLBOX_PATHS.to_string(), joined);
            env.insert(env_keys::TOOLBOX_PROFILE.to_string(), profile.name.clone());
        }

        let enabled = env
            .get(env_keys::ENABLE_TOOLBOXES)
            .is_none_or(|v| v != "0" && !v.eq_ignore_ascii_case("false"));
        if !enabled {
            return;
        }
        let roots = env
            .get(env_keys::TOOLBOX_PATHS)
            .map(String::as_str)
            .map(split_toolbox_paths)
            .unwrap_or_default();
        let Some(first) = roots.first() else {
            return;
        };

        let mut path: Vec<String> = roots
            .iter()
            .map(|root| Path::new(root).join("bin").to_string_lossy().into_owned())
            .collect();
        if let Some(previous) = env.get("PATH").filter(|p| !p.is_empty()) {
            path.push(previous.clone());
        }
        env.insert(env_keys::TOOLBOX.to_string(), first.clone());
        env.insert("PATH".to_string(), path.join(PATH_SEPARATOR));

        match env.get(env_keys::TOOLBOX_PROFILE) {
            Some(name) => log::info!("Toolbox profile '{name}' enabled ({} root(s))", roots.len()),
            None => log::info!("Toolboxes enabled ({} root(s))", roots.len()),
        }
    }

    fn apply_connection(&self, env: &mut HashMap<String, String>) {
        let conn = self.connection;
        match conn.mode {
            ConnectionMode::Hosted => {
                for key in LOCAL_ENDPOINT_VARS {
                    if let Some(value) = env.remove(*key) {
                        log::warn!(
                            "Removed stale local endpoint override {key}={value} for hosted connection"
                        );
                    }
                }
            }
            ConnectionMode::SelfHostedServer => {
                env.remove(env_keys::CLI_PATH);
                env.insert(env_keys::URL.to_string(), conn.path_or_url.clone());
                set_tls_bypass(env, &conn.path_or_url);
            }
            ConnectionMode::LocalBinary => {
                env.remove(env_keys::BIN);
                env.insert(env_keys::CLI_PATH.to_string(), conn.path_or_url.clone());
                if let Some(url) = conn.server_url() {
                    env.insert(env_keys::URL.to_string(), url.to_string());
                    set_tls_bypass(env, url);
                }
            }
        }

        if let Some(ref token) = conn.token {
            env.insert(env_keys::API_KEY.to_string(), token.clone());
        }
    }
}

const PATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// Split a toolbox root list; `,` is accepted as well as the PATH separator
#[must_use]
pub fn split_toolbox_paths(paths: &str) -> Vec<String> {
    let is_separator = |c: char| {
        if cfg!(windows) {
            c == ';'
        } else {
            c == ':' || c == ','
        }
    };
    paths
        .split(is_separator)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn set_tls_bypass(env: &mut HashMap<String, String>, url: &str) {
    if is_local_endpoint(url) {
        env.insert(env_keys::NODE_TLS.to_string(), "0".to_string());
    } else {
        env.remove(env_keys::NODE_TLS);
    }
}

/// Whether `url` points at this machine
#[must_use]
pub fn is_local_endpoint(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost")
        }
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Pin message language so error classification sees English text
pub fn ensure_locale(env: &mut HashMap<String, String>) {
    env.remove("LC_ALL");
    env.remove("LANGUAGE");
    env.insert("LC_MESSAGES".to_string(), PINNED_LOCALE.to_string());
}
