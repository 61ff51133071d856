//! Shared test doubles: a scripted process spawner and a canned auth probe

#![allow(dead_code)]

use agent_orchestra::connection::{AuthProbe, ProbeOutcome};
use agent_orchestra::transport::{CommandSpec, ProcessHandle, ProcessSpawner, SpawnedProcess};
use agent_orchestra::types::connection::Connection;
use agent_orchestra::{OrchestraError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

pub const THREAD_A: &str = "T-0b7e3a52-61f4-4d1c-8a2e-3f9d5c7b1a01";
pub const THREAD_B: &str = "T-0b7e3a52-61f4-4d1c-8a2e-3f9d5c7b1a02";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Agent output for a successful turn that reports `thread_id`
pub fn reply(thread_id: &str, text: &str) -> String {
    format!(
        concat!(
            "{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"{text}\"}}]}}}}\n",
            "{{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"session_id\":\"{thread}\",\"result\":\"{text}\"}}\n"
        ),
        text = text,
        thread = thread_id
    )
}

/// What one scripted process does
#[derive(Debug, Clone)]
pub struct Script {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    /// Pause before each stdout chunk
    pub chunk_delay: Duration,
    /// Keep the process alive until killed
    pub hang: bool,
}

impl Script {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: vec![stdout.into()],
            stderr: Vec::new(),
            exit_code: Some(0),
            chunk_delay: Duration::ZERO,
            hang: false,
        }
    }

    pub fn failure(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: vec![stderr.into()],
            exit_code: Some(exit_code),
            chunk_delay: Duration::ZERO,
            hang: false,
        }
    }

    pub fn chunked(chunks: Vec<String>, delay: Duration) -> Self {
        Self {
            stdout: chunks,
            stderr: Vec::new(),
            exit_code: Some(0),
            chunk_delay: delay,
            hang: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
            chunk_delay: Duration::ZERO,
            hang: true,
        }
    }
}

type Responder = Box<dyn Fn(&CommandSpec, usize) -> Script + Send + Sync>;

/// Spawner that plays back scripts instead of running programs
pub struct ScriptedSpawner {
    responder: Responder,
    calls: AtomicUsize,
    pub commands: Mutex<Vec<CommandSpec>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub kills: Arc<AtomicUsize>,
}

impl ScriptedSpawner {
    /// Play `scripts` in order, repeating the last one
    pub fn sequence(scripts: Vec<Script>) -> Arc<Self> {
        let scripts = Arc::new(scripts);
        Self::from_fn(move |_, call| {
            let index = call.min(scripts.len().saturating_sub(1));
            scripts[index].clone()
        })
    }

    /// Always play `script`
    pub fn always(script: Script) -> Arc<Self> {
        Self::sequence(vec![script])
    }

    /// Pick a script per command
    pub fn from_fn(f: impl Fn(&CommandSpec, usize) -> Script + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(f),
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            prompts: Arc::new(Mutex::new(Vec::new())),
            kills: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().push(spec.clone());
        let script = (self.responder)(spec, call);
        let killed = CancellationToken::new();

        let (stdin, mut stdin_reader) = tokio::io::duplex(64 * 1024);
        let prompts = Arc::clone(&self.prompts);
        tokio::spawn(async move {
            let mut prompt = String::new();
            if stdin_reader.read_to_string(&mut prompt).await.is_ok() {
                prompts.lock().push(prompt);
            }
        });

        let (stdout, stdout_writer) = tokio::io::duplex(64 * 1024);
        let (stderr, stderr_writer) = tokio::io::duplex(64 * 1024);
        spawn_writer(stdout_writer, script.stdout, script.chunk_delay, script.hang, killed.clone());
        spawn_writer(stderr_writer, script.stderr, Duration::ZERO, script.hang, killed.clone());

        Ok(SpawnedProcess {
            stdin: Some(Box::new(stdin)),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(ScriptedHandle {
                exit_code: script.exit_code,
                hang: script.hang,
                killed,
                kills: Arc::clone(&self.kills),
            }),
        })
    }
}

fn spawn_writer(
    mut writer: DuplexStream,
    chunks: Vec<String>,
    delay: Duration,
    hang: bool,
    killed: CancellationToken,
) {
    tokio::spawn(async move {
        for chunk in chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if writer.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        if hang {
            killed.cancelled().await;
        }
    });
}

struct ScriptedHandle {
    exit_code: Option<i32>,
    hang: bool,
    killed: CancellationToken,
    kills: Arc<AtomicUsize>,
}

impl ProcessHandle for ScriptedHandle {
    fn wait(&mut self) -> BoxFuture<'_, Result<Option<i32>>> {
        Box::pin(async move {
            if self.hang {
                self.killed.cancelled().await;
                return Ok(None);
            }
            Ok(self.exit_code)
        })
    }

    fn start_kill(&mut self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.killed.cancel();
        Ok(())
    }
}

/// Probe returning canned outcomes in order, repeating the last
pub struct StaticProbe {
    outcomes: Mutex<VecDeque<bool>>,
    last: bool,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn passing() -> Arc<Self> {
        Self::sequence(vec![true])
    }

    pub fn failing() -> Arc<Self> {
        Self::sequence(vec![false])
    }

    pub fn sequence(outcomes: Vec<bool>) -> Arc<Self> {
        let last = outcomes.last().copied().unwrap_or(true);
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            last,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AuthProbe for StaticProbe {
    fn probe<'a>(
        &'a self,
        _connection: &'a Connection,
        _env: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<ProbeOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let passed = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(self.last);
        Box::pin(async move {
            if passed {
                Ok(ProbeOutcome {
                    version: Some("1.2.3".to_string()),
                })
            } else {
                Err(OrchestraError::authentication("not logged in"))
            }
        })
    }
}
