//! Authentication probe
//!
//! A probe runs the optional auth command and then `<agent> --version`.
//! Exit code zero on both means the CLI is usable with the current
//! credentials.

use futures::future::BoxFuture;
use regex::Regex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{OrchestraError, Result};
use crate::transport::subprocess::config::env_keys;
use crate::transport::subprocess::resolve_program;
use crate::types::connection::Connection;

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("version regex should be valid"));

/// Result of a successful probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Version reported by the agent
    pub version: Option<String>,
}

/// Verifies that a connection is usable
pub trait AuthProbe: Send + Sync {
    /// Probe `connection` with the environment the agent will run under
    ///
    /// Failure is reported as `Authentication`.
    fn probe<'a>(
        &'a self,
        connection: &'a Connection,
        env: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<ProbeOutcome>>;
}

/// Probe that shells out to the agent CLI
#[derive(Debug, Clone)]
pub struct CliAuthProbe {
    timeout: Duration,
}

impl Default for CliAuthProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl CliAuthProbe {
    /// Probe with a custom per-command timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run the configured auth command through `sh -c`
    ///
    /// The token is passed as `AMP_TOKEN` in the command's environment and
    /// never spliced into the command text.
    async fn run_auth_command(
        &self,
        command: &str,
        connection: &Connection,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        let mut env = env.clone();
        if let Some(ref token) = connection.token {
            env.insert(env_keys::TOKEN.to_string(), token.clone());
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        let output = self.run(cmd, &env).await?;
        if output.0 != Some(0) {
            return Err(OrchestraError::authentication(format!(
                "auth command failed: {}",
                describe_failure(output.0, &output.2)
            )));
        }
        log::info!("Auth command completed");
        Ok(())
    }

    async fn run(
        &self,
        mut cmd: Command,
        env: &HashMap<String, String>,
    ) -> Result<(Option<i32>, String, String)> {
        cmd.env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                OrchestraError::authentication(format!(
                    "probe timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| OrchestraError::authentication(format!("failed to run probe: {e}")))?;

        Ok((
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl AuthProbe for CliAuthProbe {
    fn probe<'a>(
        &'a self,
        connection: &'a Connection,
        env: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<ProbeOutcome>> {
        Box::pin(async move {
            if let Some(ref command) = connection.auth_command {
                self.run_auth_command(command, connection, env).await?;
            }

            let (program, args) = resolve_program(connection)
                .map_err(|e| OrchestraError::authentication(e.to_string()))?;
            let mut cmd = Command::new(&program);
            cmd.args(&args).arg("--version");

            let (code, stdout, stderr) = self.run(cmd, env).await?;
            if code != Some(0) {
                return Err(OrchestraError::authentication(format!(
                    "{} --version failed: {}",
                    program.display(),
                    describe_failure(code, &stderr)
                )));
            }

            let version = extract_version(&stdout);
            log::info!(
                "Agent CLI ready ({} mode, version {})",
                connection.mode,
                version.as_deref().unwrap_or("unknown")
            );
            Ok(ProbeOutcome { version })
        })
    }
}

fn describe_failure(code: Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Pull a semantic version out of `--version` output
///
/// Falls back to the first non-empty line when no `x.y.z` appears.
#[must_use]
pub fn extract_version(output: &str) -> Option<String> {
    if let Some(caps) = VERSION_PATTERN.captures(output) {
        return Some(caps[1].to_string());
    }
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Environment keys whose values must never reach logs
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["TOKEN", "SECRET", "KEY", "PASSWORD"]
        .iter()
        .any(|needle| upper.contains(needle))
}
