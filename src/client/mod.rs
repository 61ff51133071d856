//! Per-conversation process orchestrator
//!
//! A [`ProcessOrchestrator`] is bound to one resolved [`Connection`] and one
//! session configuration. Each user turn spawns one agent process (more when
//! retried), streams its decoded output as [`StreamingEvent`]s the moment it
//! is read, and resolves with an [`OrchestrationResult`].
//!
//! # Event flow
//!
//! ```text
//!  stdout ──► StreamEventCodec ──┐
//!                                ├──► events channel ──► SessionManager
//!  stderr ──► strip_ansi ────────┘         │
//!                                          └──► OrchestrationResult.events
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agent_orchestra::{
//!     CliAuthProbe, Connection, ConnectionMode, OrchestratorOptions, ProcessOrchestrator,
//!     SessionConfig, TokioSpawner, TurnRequest,
//! };
//!
//! # async fn example() -> agent_orchestra::Result<()> {
//! let connection = Connection::new(ConnectionMode::Hosted, "amp");
//! let config = SessionConfig::builder("/tmp/project").build();
//! let (orchestrator, mut events) = ProcessOrchestrator::new(
//!     connection,
//!     config,
//!     Arc::new(TokioSpawner),
//!     Arc::new(CliAuthProbe::default()),
//!     OrchestratorOptions::default(),
//! );
//! orchestrator.initialize().await?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         log::info!("{}: {:?}", event.kind(), event.payload);
//!     }
//! });
//!
//! let result = orchestrator
//!     .start_thread(&TurnRequest::new("hello", "/tmp/project"))
//!     .await;
//! if let Some(thread_id) = result.thread_id {
//!     orchestrator
//!         .continue_thread(&thread_id, &TurnRequest::new("and again", "/tmp/project"))
//!         .await;
//! }
//! # Ok(())
//! # }
//! ```

mod retry;
mod turn;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::AuthProbe;
use crate::error::Result;
use crate::transport::subprocess::EnvironmentComposer;
use crate::transport::ProcessSpawner;
use crate::types::connection::Connection;
use crate::types::events::{EventPayload, StreamingEvent};
use crate::types::identifiers::AgentThreadId;
use crate::types::options::{SessionConfig, TurnRequest};
use crate::types::result::OrchestrationResult;

pub use retry::{ErrorClass, RetryPolicy, classify};

/// Settings shared by every orchestrator a manager creates
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Retry behaviour for failed turns
    pub retry: RetryPolicy,
    /// Marker stripped from the start of each stdout line
    pub line_prefix: Option<String>,
    /// Environment layered under the session's own variables
    pub env: HashMap<String, String>,
}

impl OrchestratorOptions {
    /// Set the retry policy
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the stdout line prefix
    #[must_use]
    pub fn line_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.line_prefix = Some(prefix.into());
        self
    }
}

/// Runs agent turns for one conversation
pub struct ProcessOrchestrator {
    connection: Connection,
    config: SessionConfig,
    spawner: Arc<dyn ProcessSpawner>,
    probe: Arc<dyn AuthProbe>,
    options: OrchestratorOptions,
    events: mpsc::UnboundedSender<StreamingEvent>,
    initialized: AtomicBool,
    authenticated: AtomicBool,
    version: Mutex<Option<String>>,
    turn_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl ProcessOrchestrator {
    /// Create an orchestrator and the receiving end of its event feed
    ///
    /// The orchestrator is not usable until [`initialize`](Self::initialize)
    /// succeeds.
    #[must_use]
    pub fn new(
        connection: Connection,
        config: SessionConfig,
        spawner: Arc<dyn ProcessSpawner>,
        probe: Arc<dyn AuthProbe>,
        options: OrchestratorOptions,
    ) -> (Self, mpsc::UnboundedReceiver<StreamingEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            connection,
            config,
            spawner,
            probe,
            options,
            events,
            initialized: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            version: Mutex::new(None),
            turn_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        };
        (orchestrator, rx)
    }

    /// Probe authentication and mark the orchestrator ready
    ///
    /// Emits `connection-info` before the probe and again after it. The
    /// self-hosted server mode needs no CLI authentication and emits a single
    /// authenticated `connection-info`.
    ///
    /// # Errors
    /// Returns `Authentication` if the probe fails
    pub async fn initialize(&self) -> Result<()> {
        if !self.connection.requires_auth() {
            self.authenticated.store(true, Ordering::SeqCst);
            self.emit_connection_info(&mut Vec::new());
            self.initialized.store(true, Ordering::SeqCst);
            log::info!("Orchestrator ready: {}", self.connection.description());
            return Ok(());
        }

        self.emit_connection_info(&mut Vec::new());
        let outcome = self.run_probe().await;
        self.emit_connection_info(&mut Vec::new());
        outcome?;

        self.initialized.store(true, Ordering::SeqCst);
        log::info!("Orchestrator ready: {}", self.connection.description());
        Ok(())
    }

    /// Ready once initialized and until shut down
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Outcome of the most recent authentication probe
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Connection this orchestrator was built for
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Session configuration this orchestrator was built for
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new agent thread
    pub async fn start_thread(&self, turn: &TurnRequest) -> OrchestrationResult {
        self.run_turn(turn, None).await
    }

    /// Continue an established agent thread
    pub async fn continue_thread(
        &self,
        thread_id: &AgentThreadId,
        turn: &TurnRequest,
    ) -> OrchestrationResult {
        self.run_turn(turn, Some(thread_id)).await
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Kill any running process and refuse further turns
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            log::debug!("Shutting down orchestrator for {}", self.connection.mode);
            self.cancel.cancel();
        }
    }

    /// Full child environment for this connection and session
    pub(crate) fn environment(&self) -> HashMap<String, String> {
        let mut caller = self.options.env.clone();
        caller.extend(self.config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        EnvironmentComposer::new(&self.connection)
            .toolbox_profile(self.config.toolbox_profile.as_ref())
            .compose(std::env::vars(), &caller, self.config.flags)
    }

    async fn run_probe(&self) -> Result<()> {
        let env = self.environment();
        match self.probe.probe(&self.connection, &env).await {
            Ok(outcome) => {
                *self.version.lock() = outcome.version;
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                log::warn!("Authentication probe failed: {e}");
                self.authenticated.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn emit_connection_info(&self, collected: &mut Vec<StreamingEvent>) {
        let payload = EventPayload::ConnectionInfo {
            mode: self.connection.mode,
            description: self.connection.description(),
            authenticated: self.is_authenticated(),
            auth_required: self.connection.requires_auth(),
            version: self.version.lock().clone(),
        };
        self.emit(StreamingEvent::now(payload), collected);
    }

    fn emit(&self, event: StreamingEvent, collected: &mut Vec<StreamingEvent>) {
        let _ = self.events.send(event.clone());
        collected.push(event);
    }
}

impl Drop for ProcessOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
