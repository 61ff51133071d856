//! Multi-session management
//!
//! Provides `SessionManager` for creating, evicting, restarting, and tearing
//! down many concurrent agent sessions, each backed by its own
//! `ProcessOrchestrator`.
//!
//! # Module Structure
//!
//! - `session_manager` - Core `SessionManager` with public API
//! - `session` - Session state structures
//! - `events` - Events published on the manager's channel
//! - `metrics` - Activity counters
//! - `background` - Event forwarding and housekeeping tasks
//! - `helpers` - Pure selection helpers for eviction and cleanup

mod background;
mod events;
mod helpers;
mod metrics;
mod session;
mod session_manager;

pub use events::{DestroyReason, SessionEvent};
pub use metrics::SessionMetrics;
pub use session::{SessionInfo, SessionState};
pub use session_manager::{SessionManager, SessionManagerBuilder};
