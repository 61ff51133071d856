//! Type definitions for the orchestrator
//!
//! - [`identifiers`] - Type-safe ID wrappers (`SessionId`, `ThreadId`, `AgentThreadId`)
//! - [`connection`] - Resolved connection target
//! - [`events`] - The closed streaming event union
//! - [`options`] - Session configuration and turn requests
//! - [`result`] - Per-turn outcome

pub mod connection;
pub mod events;
pub mod identifiers;
pub mod options;
pub mod result;

// Re-export commonly used types
pub use connection::{Connection, ConnectionMode};
pub use events::{EventPayload, StreamingEvent};
pub use identifiers::{AgentThreadId, SessionId, ThreadId};
pub use options::{
    SendMessageRequest, SessionConfig, SessionConfigBuilder, SessionFlags, ToolboxProfile,
    TurnRequest,
};
pub use result::OrchestrationResult;
