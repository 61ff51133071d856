//! # Agent Orchestra
//!
//! Runs many concurrent conversations with an external coding-agent CLI.
//! Each conversation is a session bound to a working directory; each user
//! turn launches the agent as a child process and streams its output back as
//! typed events.
//!
//! ## Layers
//!
//! - [`connection`] decides *where* the agent runs: the hosted service, a
//!   self-hosted server, or a locally built binary.
//! - [`message`] turns the agent's line-oriented JSON output into
//!   [`StreamingEvent`]s, tolerating partial lines and non-JSON noise.
//! - [`client`] holds the [`ProcessOrchestrator`], which runs turns with
//!   retry and re-authentication.
//! - [`manager`] owns every live session in a [`SessionManager`] with LRU
//!   eviction, idle cleanup and restart on configuration change.
//! - [`ledger`] is the persisted session and thread state machine the UI
//!   renders from.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agent_orchestra::{OrchestraConfig, SendMessageRequest, SessionConfig, SessionManager};
//!
//! # async fn example() -> agent_orchestra::Result<()> {
//! let manager = SessionManager::new(OrchestraConfig::load());
//! let mut events = manager.subscribe();
//!
//! let session_id = manager
//!     .create_session(SessionConfig::builder("/path/to/project").build())
//!     .await?;
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         log::info!("{}: {:?}", event.session_id(), event);
//!     }
//! });
//!
//! let result = manager
//!     .send_message(SendMessageRequest::new(session_id.clone(), "ping"))
//!     .await?;
//! log::info!("thread {:?}, success {}", result.thread_id, result.success);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod message;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use client::{ErrorClass, OrchestratorOptions, ProcessOrchestrator, RetryPolicy};
pub use config::OrchestraConfig;
pub use connection::{
    AuthProbe, CliAuthProbe, ConnectionOverrides, ConnectionResolver, EnvConnectionResolver,
};
pub use error::{OrchestraError, Result};
pub use ledger::{Ledger, LedgerAction, LedgerState, SnapshotStore, WorktreeProvider};
pub use manager::{
    DestroyReason, SessionEvent, SessionInfo, SessionManager, SessionMetrics, SessionState,
};
pub use message::{ParserState, StreamEventExtractor, feed};
pub use transport::{ProcessSpawner, TokioSpawner};

// Re-export type submodules for flat public API
pub use types::connection::{Connection, ConnectionMode};
pub use types::events::{EventPayload, StreamingEvent};
pub use types::identifiers::{AgentThreadId, SessionId, ThreadId};
pub use types::options::{
    SendMessageRequest, SessionConfig, SessionFlags, ToolboxProfile, TurnRequest,
};
pub use types::result::OrchestrationResult;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
