//! Background tasks owned by the session manager

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::SessionEvent;
use super::session_manager::ManagerInner;
use crate::types::events::StreamingEvent;
use crate::types::identifiers::SessionId;

/// Forward one orchestrator's events to the session and global channels
///
/// Runs until the orchestrator's feed closes or `cancel` fires. After
/// cancellation, events already queued are still delivered.
pub(super) fn spawn_forwarder(
    session_id: SessionId,
    mut rx: mpsc::UnboundedReceiver<StreamingEvent>,
    session_tx: broadcast::Sender<StreamingEvent>,
    global_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let forward = move |event: StreamingEvent| {
        let _ = session_tx.send(event.clone());
        let _ = global_tx.send(SessionEvent::Stream {
            session_id: session_id.clone(),
            event,
        });
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                maybe = rx.recv() => match maybe {
                    Some(event) => forward(event),
                    None => break,
                },
                () = cancel.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        forward(event);
                    }
                    break;
                }
            }
        }
    })
}

/// Periodically remove sessions idle longer than `max_age_minutes`
pub(super) fn spawn_housekeeping(
    inner: Weak<ManagerInner>,
    max_age_minutes: u64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let removed = inner.cleanup_inactive(max_age_minutes);
            if !removed.is_empty() {
                log::info!("Housekeeping removed {} idle session(s)", removed.len());
            }
        }
    })
}
