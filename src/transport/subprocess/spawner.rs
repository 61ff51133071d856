//! Real process spawning on tokio

use futures::future::BoxFuture;
use std::process::Stdio;
use tokio::process::{Child, Command};

use crate::error::{OrchestraError, Result};
use crate::transport::{CommandSpec, ProcessHandle, ProcessSpawner, SpawnedProcess};

/// Spawns agents with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&spec.env)
            .env("PWD", &spec.cwd)
            // Piped stderr keeps the child away from the parent terminal
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("Spawning agent: {}", spec.display());

        let mut child = cmd.spawn().map_err(|e| {
            if !spec.cwd.exists() {
                return OrchestraError::spawn(format!(
                    "Working directory does not exist: {}",
                    spec.cwd.display()
                ));
            }
            OrchestraError::spawn(format!("Failed to start {}: {e}", spec.program.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrchestraError::spawn("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestraError::spawn("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| OrchestraError::spawn("Failed to get stderr handle"))?;

        Ok(SpawnedProcess {
            stdin: Some(Box::new(stdin)),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(ChildHandle { child }),
        })
    }
}

struct ChildHandle {
    child: Child,
}

impl ProcessHandle for ChildHandle {
    fn wait(&mut self) -> BoxFuture<'_, Result<Option<i32>>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            Ok(status.code())
        })
    }

    fn start_kill(&mut self) -> Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
