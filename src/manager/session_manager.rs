//! Session manager for many concurrent agent conversations
//!
//! Owns one [`ProcessOrchestrator`] per session, bounded by
//! `max_sessions`. When full, the least-recently-active inactive session is
//! evicted; active sessions and sessions with a turn in flight are never
//! evicted.
//!
//! Turns for different sessions run concurrently. A configuration change
//! that affects the connection takes the restart gate exclusively, so no
//! new turn starts until every session has been rebuilt.

use chrono::{Duration as ChronoDuration, Utc};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::background::{spawn_forwarder, spawn_housekeeping};
use super::events::{DestroyReason, SessionEvent};
use super::helpers::{eviction_candidate, expired_sessions};
use super::metrics::{MetricsRecorder, SessionMetrics};
use super::session::{InFlightGuard, SessionEntry, SessionInfo, SessionState};
use crate::client::ProcessOrchestrator;
use crate::config::OrchestraConfig;
use crate::connection::{AuthProbe, CliAuthProbe, ConnectionResolver, EnvConnectionResolver};
use crate::error::{OrchestraError, Result};
use crate::transport::{ProcessSpawner, TokioSpawner};
use crate::types::events::StreamingEvent;
use crate::types::identifiers::SessionId;
use crate::types::options::{SendMessageRequest, SessionConfig, TurnRequest};
use crate::types::result::OrchestrationResult;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Buffered events per session subscriber
const SESSION_CHANNEL_CAPACITY: usize = 1024;

/// Buffered events on the global channel
const GLOBAL_CHANNEL_CAPACITY: usize = 4096;

/// Default interval between idle-session sweeps
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// SHARED STATE
// ============================================================================

pub(super) struct ManagerInner {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    config: RwLock<OrchestraConfig>,
    resolver: Arc<dyn ConnectionResolver>,
    spawner: Arc<dyn ProcessSpawner>,
    probe: Arc<dyn AuthProbe>,
    events: broadcast::Sender<SessionEvent>,
    restart_gate: tokio::sync::RwLock<()>,
    activity_seq: AtomicU64,
    metrics: Mutex<MetricsRecorder>,
}

impl ManagerInner {
    fn next_seq(&self) -> u64 {
        self.activity_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn destroyed(&self, entry: SessionEntry, reason: DestroyReason) -> SessionInfo {
        let info = entry.teardown();
        self.metrics.lock().session_destroyed();
        log::info!("Session {} destroyed ({reason:?})", info.id);
        self.publish(SessionEvent::Destroyed {
            session_id: info.id.clone(),
            reason,
        });
        info
    }

    /// Make room for one more session, evicting if necessary
    fn reserve_slot(
        &self,
        sessions: &mut HashMap<SessionId, SessionEntry>,
        max_sessions: usize,
    ) -> Result<()> {
        if sessions.len() < max_sessions {
            return Ok(());
        }
        let victim = eviction_candidate(sessions)
            .and_then(|id| sessions.remove(&id))
            .ok_or(OrchestraError::CapacityReached(max_sessions))?;
        self.destroyed(victim, DestroyReason::Evicted);
        Ok(())
    }

    /// Build, register, and initialize a session under `id`
    async fn create_with_id(&self, id: SessionId, config: SessionConfig) -> Result<SessionId> {
        let (connection, options, max_sessions) = {
            let cfg = self.config.read();
            let connection = self.resolver.resolve(&cfg.connection, &cfg.resolution_env())?;
            (connection, cfg.orchestrator_options(), cfg.max_sessions)
        };

        let (orchestrator, rx) = ProcessOrchestrator::new(
            connection,
            config.clone(),
            Arc::clone(&self.spawner),
            Arc::clone(&self.probe),
            options,
        );
        let orchestrator = Arc::new(orchestrator);
        let (session_tx, _) = broadcast::channel(SESSION_CHANNEL_CAPACITY);

        {
            let mut sessions = self.sessions.lock();
            self.reserve_slot(&mut sessions, max_sessions)?;
            sessions.insert(
                id.clone(),
                SessionEntry {
                    info: SessionInfo::new(id.clone(), config),
                    activity_seq: self.next_seq(),
                    orchestrator: Arc::clone(&orchestrator),
                    session_tx: session_tx.clone(),
                    in_flight: Arc::default(),
                },
            );
        }

        spawn_forwarder(
            id.clone(),
            rx,
            session_tx,
            self.events.clone(),
            orchestrator.cancellation_token(),
        );

        if let Err(e) = orchestrator.initialize().await {
            if let Some(mut entry) = self.sessions.lock().remove(&id) {
                entry.info.state = SessionState::Failed;
                entry.orchestrator.shutdown();
            }
            log::warn!("Session {id} failed to initialize: {e}");
            return Err(e);
        }

        {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(&id) else {
                orchestrator.shutdown();
                return Err(OrchestraError::cancelled(format!(
                    "session {id} was destroyed during initialization"
                )));
            };
            entry.set_active(true);
            entry.touch(self.next_seq());
        }

        self.metrics.lock().session_created();
        log::info!("Session {id} created");
        self.publish(SessionEvent::Created {
            session_id: id.clone(),
        });
        Ok(id)
    }

    /// Remove inactive sessions idle for longer than `max_age_minutes`
    pub(super) fn cleanup_inactive(&self, max_age_minutes: u64) -> Vec<SessionId> {
        let minutes = i64::try_from(max_age_minutes).unwrap_or(i64::MAX);
        let Some(cutoff) = ChronoDuration::try_minutes(minutes)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };

        let removed: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock();
            expired_sessions(&sessions, cutoff)
                .into_iter()
                .filter_map(|id| sessions.remove(&id))
                .collect()
        };

        removed
            .into_iter()
            .map(|entry| self.destroyed(entry, DestroyReason::Expired).id)
            .collect()
    }

    fn drain(&self, reason: DestroyReason) -> Vec<SessionInfo> {
        let entries: Vec<SessionEntry> = self.sessions.lock().drain().map(|(_, e)| e).collect();
        let mut infos: Vec<SessionInfo> = entries
            .into_iter()
            .map(|entry| self.destroyed(entry, reason))
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

/// Manager for multiple concurrent agent sessions
pub struct SessionManager {
    inner: Arc<ManagerInner>,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Manager with the real resolver, spawner, and probe
    ///
    /// Must be called inside a tokio runtime when `idle_timeout_minutes` is set.
    #[must_use]
    pub fn new(config: OrchestraConfig) -> Self {
        Self::builder(config).build()
    }

    /// Builder for swapping collaborators
    #[must_use]
    pub fn builder(config: OrchestraConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            resolver: None,
            spawner: None,
            probe: None,
            housekeeping_interval: HOUSEKEEPING_INTERVAL,
        }
    }

    /// Create a session and wait for its orchestrator to initialize
    ///
    /// # Errors
    /// - `CapacityReached` when full and nothing can be evicted
    /// - `ConnectionResolution` or `Authentication` from initialization;
    ///   no entry is left behind in either case
    pub async fn create_session(&self, config: SessionConfig) -> Result<SessionId> {
        let _gate = self.inner.restart_gate.read().await;
        self.inner.create_with_id(SessionId::generate(), config).await
    }

    /// Run one turn on a session
    ///
    /// Continues the session's agent thread when one is established,
    /// otherwise starts a new one and records its identifier. A failed turn
    /// is returned normally and also published as [`SessionEvent::Error`],
    /// unless the session was destroyed or rebuilt while the turn ran.
    ///
    /// The session is active while the turn runs and returns to inactive
    /// afterwards unless it was pinned with
    /// [`activate_session`](Self::activate_session).
    ///
    /// # Errors
    /// `SessionNotFound` or `SessionNotReady`
    pub async fn send_message(&self, request: SendMessageRequest) -> Result<OrchestrationResult> {
        let SendMessageRequest {
            session_id,
            prompt,
            working_directory,
            model_override,
        } = request;

        let (orchestrator, thread_id, turn, in_flight) = {
            let _gate = self.inner.restart_gate.read().await;
            let mut sessions = self.inner.sessions.lock();
            let entry = sessions
                .get_mut(&session_id)
                .ok_or_else(|| OrchestraError::session_not_found(session_id.as_str()))?;
            if !entry.orchestrator.is_ready() {
                return Err(OrchestraError::session_not_ready(session_id.as_str()));
            }
            if let Some(dir) = working_directory {
                entry.info.working_directory = dir;
            }
            entry.set_active(true);
            entry.touch(self.inner.next_seq());

            let turn = TurnRequest {
                prompt,
                working_directory: entry.info.working_directory.clone(),
                model_override,
            };
            (
                Arc::clone(&entry.orchestrator),
                entry.info.thread_id.clone(),
                turn,
                InFlightGuard::new(&entry.in_flight),
            )
        };

        let started = tokio::time::Instant::now();
        let result = match thread_id {
            Some(ref thread_id) => orchestrator.continue_thread(thread_id, &turn).await,
            None => orchestrator.start_thread(&turn).await,
        };
        drop(in_flight);
        self.inner
            .metrics
            .lock()
            .turn_finished(result.success, started.elapsed());

        let registered = {
            let mut sessions = self.inner.sessions.lock();
            match sessions.get_mut(&session_id) {
                Some(entry) if Arc::ptr_eq(&entry.orchestrator, &orchestrator) => {
                    entry.touch(self.inner.next_seq());
                    if entry.info.thread_id.is_none() && result.success {
                        entry.info.thread_id = result.thread_id.clone();
                    }
                    entry.finish_turn();
                    true
                }
                _ => false,
            }
        };
        let still_live = registered && !orchestrator.cancellation_token().is_cancelled();

        if let Some(message) = result.failure_message() {
            if still_live {
                log::warn!("Turn failed for session {session_id}: {message}");
                self.inner.publish(SessionEvent::Error {
                    session_id,
                    message: message.to_string(),
                });
            } else {
                log::debug!("Turn on torn-down session {session_id} ended: {message}");
            }
        }
        Ok(result)
    }

    /// Tear down a session; unknown ids are ignored
    ///
    /// Returns whether a session was removed.
    pub async fn destroy_session(&self, session_id: &SessionId) -> bool {
        let _gate = self.inner.restart_gate.read().await;
        let entry = self.inner.sessions.lock().remove(session_id);
        match entry {
            Some(entry) => {
                self.inner.destroyed(entry, DestroyReason::Requested);
                true
            }
            None => false,
        }
    }

    /// Rebuild every session against the current configuration
    ///
    /// Each session keeps its id, configuration, and working directory; its
    /// agent thread is not carried over. A session that fails to come back is
    /// logged and skipped. Returns the number recreated.
    pub async fn restart_all_sessions(&self) -> usize {
        let _gate = self.inner.restart_gate.write().await;
        let captured = self.inner.drain(DestroyReason::Restarted);
        log::info!("Restarting {} session(s)", captured.len());

        let mut restarted = 0;
        for info in captured {
            let mut config = info.config;
            config.working_directory = info.working_directory;
            match self.inner.create_with_id(info.id.clone(), config).await {
                Ok(id) => {
                    restarted += 1;
                    if let Some(entry) = self.inner.sessions.lock().get_mut(&id) {
                        entry.info.pinned = info.pinned;
                        entry.set_active(info.is_active);
                    }
                }
                Err(e) => log::error!("Failed to recreate session {}: {e}", info.id),
            }
        }
        restarted
    }

    /// Replace the configuration, restarting sessions if the connection changed
    ///
    /// Returns the number of sessions restarted. Settings that do not touch
    /// the connection, such as `retry` and `line_prefix`, take effect for
    /// sessions created or restarted afterwards.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation
    pub async fn update_config(&self, config: OrchestraConfig) -> Result<usize> {
        config.validate()?;
        let changed = {
            let mut current = self.inner.config.write();
            let changed = current.connection_changed(&config);
            *current = config;
            changed
        };
        if changed {
            log::info!("Connection settings changed");
            Ok(self.restart_all_sessions().await)
        } else {
            Ok(0)
        }
    }

    /// Remove inactive sessions idle for longer than `max_age_minutes`
    pub fn cleanup_inactive_sessions(&self, max_age_minutes: u64) -> Vec<SessionId> {
        self.inner.cleanup_inactive(max_age_minutes)
    }

    /// Pin a session as in use by the UI
    ///
    /// A pinned session stays active between turns and is never evicted.
    ///
    /// # Errors
    /// `SessionNotFound` or `SessionNotReady`
    pub fn activate_session(&self, session_id: &SessionId) -> Result<()> {
        self.set_active(session_id, true)
    }

    /// Unpin a session, making it eligible for eviction once idle
    ///
    /// # Errors
    /// `SessionNotFound` or `SessionNotReady`
    pub fn deactivate_session(&self, session_id: &SessionId) -> Result<()> {
        self.set_active(session_id, false)
    }

    fn set_active(&self, session_id: &SessionId, active: bool) -> Result<()> {
        let mut sessions = self.inner.sessions.lock();
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| OrchestraError::session_not_found(session_id.as_str()))?;
        if entry.info.state == SessionState::Initializing {
            return Err(OrchestraError::session_not_ready(session_id.as_str()));
        }
        entry.info.pinned = active;
        if active {
            entry.set_active(true);
            entry.touch(self.inner.next_seq());
        } else if !entry.is_busy() {
            entry.set_active(false);
        }
        Ok(())
    }

    /// Snapshot of one session
    #[must_use]
    pub fn session_info(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.info.clone())
    }

    /// Snapshots of every session, oldest first
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self
            .inner
            .sessions
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Number of registered sessions, including initializing ones
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Activity counters since the manager was built
    #[must_use]
    pub fn metrics(&self) -> SessionMetrics {
        let (live, active) = {
            let sessions = self.inner.sessions.lock();
            let active = sessions.values().filter(|e| e.info.is_active).count();
            (sessions.len(), active)
        };
        self.inner.metrics.lock().snapshot(live, active)
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> OrchestraConfig {
        self.inner.config.read().clone()
    }

    /// Subscribe to events from every session
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to one session's agent events; closed when it is destroyed
    ///
    /// # Errors
    /// `SessionNotFound`
    pub fn subscribe_session(
        &self,
        session_id: &SessionId,
    ) -> Result<broadcast::Receiver<StreamingEvent>> {
        self.inner
            .sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.session_tx.subscribe())
            .ok_or_else(|| OrchestraError::session_not_found(session_id.as_str()))
    }

    /// Global events as an async stream
    ///
    /// Lagging consumers skip missed events with a warning.
    pub fn event_stream(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Event stream lagged, skipped {missed} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Destroy every session and stop housekeeping
    pub async fn shutdown(&self) {
        if let Some(handle) = self.housekeeping.lock().take() {
            handle.abort();
        }
        let _gate = self.inner.restart_gate.write().await;
        let removed = self.inner.drain(DestroyReason::Shutdown);
        log::info!("Session manager shut down ({} session(s) closed)", removed.len());
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.housekeeping.lock().take() {
            handle.abort();
        }
        for entry in self.inner.sessions.lock().values() {
            entry.orchestrator.shutdown();
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    config: OrchestraConfig,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    probe: Option<Arc<dyn AuthProbe>>,
    housekeeping_interval: Duration,
}

impl SessionManagerBuilder {
    /// Use a custom connection resolver
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom process spawner
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Use a custom authentication probe
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn AuthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Interval between idle-session sweeps
    #[must_use]
    pub fn housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Build the manager, starting housekeeping if an idle timeout is set
    #[must_use]
    pub fn build(self) -> SessionManager {
        let (events, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        let idle_timeout = self.config.idle_timeout_minutes;

        let inner = Arc::new(ManagerInner {
            sessions: Mutex::new(HashMap::new()),
            config: RwLock::new(self.config),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(EnvConnectionResolver::new())),
            spawner: self.spawner.unwrap_or_else(|| Arc::new(TokioSpawner)),
            probe: self
                .probe
                .unwrap_or_else(|| Arc::new(CliAuthProbe::default())),
            events,
            restart_gate: tokio::sync::RwLock::new(()),
            activity_seq: AtomicU64::new(0),
            metrics: Mutex::new(MetricsRecorder::default()),
        });

        let housekeeping = idle_timeout.and_then(|minutes| {
            if tokio::runtime::Handle::try_current().is_err() {
                log::warn!("No tokio runtime; idle-session housekeeping disabled");
                return None;
            }
            Some(spawn_housekeeping(
                Arc::downgrade(&inner),
                minutes,
                self.housekeeping_interval,
            ))
        });

        SessionManager {
            inner,
            housekeeping: Mutex::new(housekeeping),
        }
    }
}
