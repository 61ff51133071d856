//! Integration tests for the session manager
//!
//! Uses the real connection resolver with explicit overrides and scripted
//! agent processes.

mod common;

use agent_orchestra::{
    AgentThreadId, ConnectionMode, ConnectionOverrides, DestroyReason, EnvConnectionResolver,
    OrchestraConfig, OrchestraError, SendMessageRequest, SessionConfig, SessionEvent,
    SessionManager, SessionState, StreamingEvent,
};
use common::{Script, ScriptedSpawner, StaticProbe, THREAD_A, init_logging, reply};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

const LOCAL_AGENT: &str = "/opt/amp/bin/amp";

fn hosted_config(max_sessions: usize) -> OrchestraConfig {
    OrchestraConfig {
        connection: ConnectionOverrides {
            mode: Some(ConnectionMode::Hosted),
            ..ConnectionOverrides::default()
        },
        max_sessions,
        ..OrchestraConfig::default()
    }
}

fn local_config(max_sessions: usize) -> OrchestraConfig {
    OrchestraConfig {
        connection: ConnectionOverrides {
            mode: Some(ConnectionMode::LocalBinary),
            cli_path: Some(LOCAL_AGENT.to_string()),
            ..ConnectionOverrides::default()
        },
        max_sessions,
        ..OrchestraConfig::default()
    }
}

fn manager(
    config: OrchestraConfig,
    spawner: Arc<ScriptedSpawner>,
    probe: Arc<StaticProbe>,
) -> SessionManager {
    SessionManager::builder(config)
        .resolver(Arc::new(EnvConnectionResolver::with_local_checkout(None)))
        .spawner(spawner)
        .probe(probe)
        .build()
}

fn session_config() -> SessionConfig {
    SessionConfig::builder(std::env::temp_dir()).build()
}

async fn next_matching<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    mut pred: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(item) if pred(&item) => return item,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("channel closed"),
            }
        }
    })
    .await
    .expect("event within timeout")
}

#[tokio::test]
async fn test_capacity_reached_when_every_session_is_active() {
    init_logging();
    let manager = manager(
        hosted_config(2),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let first = manager.create_session(session_config()).await.unwrap();
    let second = manager.create_session(session_config()).await.unwrap();

    let err = manager.create_session(session_config()).await.unwrap_err();
    assert!(matches!(err, OrchestraError::CapacityReached(2)));
    assert!(err.is_capacity());
    assert_eq!(manager.session_count(), 2);

    let mut ids: Vec<_> = manager.list_sessions().into_iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    assert_eq!(ids, expected);
    for id in [first, second] {
        let result = manager
            .send_message(SendMessageRequest::new(id, "still there?"))
            .await
            .unwrap();
        assert!(result.success);
    }
}

#[tokio::test]
async fn test_finished_turns_make_sessions_evictable() {
    let manager = manager(
        hosted_config(2),
        ScriptedSpawner::always(Script::success(reply(THREAD_A, "pong"))),
        StaticProbe::passing(),
    );
    let mut events = manager.subscribe();
    let first = manager.create_session(session_config()).await.unwrap();
    manager
        .send_message(SendMessageRequest::new(first.clone(), "ping"))
        .await
        .unwrap();
    assert_eq!(manager.session_info(&first).unwrap().state, SessionState::Inactive);

    let second = manager.create_session(session_config()).await.unwrap();
    manager
        .send_message(SendMessageRequest::new(second.clone(), "ping"))
        .await
        .unwrap();

    let third = manager.create_session(session_config()).await.unwrap();
    assert!(manager.session_info(&first).is_none());
    assert!(manager.session_info(&second).is_some());
    assert!(manager.session_info(&third).is_some());
    let evicted = next_matching(&mut events, |e| matches!(e, SessionEvent::Destroyed { .. })).await;
    assert_eq!(
        evicted,
        SessionEvent::Destroyed {
            session_id: first,
            reason: DestroyReason::Evicted
        }
    );
}

#[tokio::test]
async fn test_pinned_session_stays_active_after_turn() {
    let manager = manager(
        hosted_config(1),
        ScriptedSpawner::always(Script::success(reply(THREAD_A, "pong"))),
        StaticProbe::passing(),
    );
    let id = manager.create_session(session_config()).await.unwrap();
    manager.activate_session(&id).unwrap();
    manager
        .send_message(SendMessageRequest::new(id.clone(), "ping"))
        .await
        .unwrap();

    let info = manager.session_info(&id).unwrap();
    assert!(info.pinned);
    assert_eq!(info.state, SessionState::Active);
    let err = manager.create_session(session_config()).await.unwrap_err();
    assert!(err.is_capacity());
}

#[tokio::test]
async fn test_evicts_least_recently_active_inactive_session() {
    let manager = manager(
        hosted_config(2),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let mut events = manager.subscribe();
    let first = manager.create_session(session_config()).await.unwrap();
    let second = manager.create_session(session_config()).await.unwrap();
    manager.deactivate_session(&first).unwrap();
    manager.deactivate_session(&second).unwrap();

    let third = manager.create_session(session_config()).await.unwrap();

    assert!(manager.session_info(&first).is_none());
    assert!(manager.session_info(&second).is_some());
    assert!(manager.session_info(&third).is_some());
    let evicted = next_matching(&mut events, |e| matches!(e, SessionEvent::Destroyed { .. })).await;
    assert_eq!(
        evicted,
        SessionEvent::Destroyed {
            session_id: first,
            reason: DestroyReason::Evicted
        }
    );
}

#[tokio::test]
async fn test_failed_initialization_leaves_no_entry() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::failing(),
    );
    let err = manager.create_session(session_config()).await.unwrap_err();
    assert!(matches!(err, OrchestraError::Authentication(_)));
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn test_thread_identifier_is_reused_for_continuation() {
    let spawner = ScriptedSpawner::always(Script::success(reply(THREAD_A, "pong")));
    let manager = manager(hosted_config(4), spawner.clone(), StaticProbe::passing());
    let id = manager.create_session(session_config()).await.unwrap();

    let first = manager
        .send_message(SendMessageRequest::new(id.clone(), "ping"))
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(
        manager.session_info(&id).unwrap().thread_id,
        Some(AgentThreadId::new(THREAD_A))
    );

    manager
        .send_message(SendMessageRequest::new(id.clone(), "ping again"))
        .await
        .unwrap();

    let commands = spawner.commands();
    assert_eq!(commands.len(), 2);
    assert!(!commands[0].args.iter().any(|a| a == "threads"));
    assert_eq!(&commands[1].args[..3], &["threads", "continue", THREAD_A]);
}

#[tokio::test]
async fn test_failed_turn_is_published_as_error_event() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::failure("model overloaded", 1)),
        StaticProbe::passing(),
    );
    let id = manager.create_session(session_config()).await.unwrap();
    let mut events = manager.subscribe();

    let result = manager
        .send_message(SendMessageRequest::new(id.clone(), "ping"))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(manager.session_info(&id).unwrap().thread_id, None);

    let error = next_matching(&mut events, |e| matches!(e, SessionEvent::Error { .. })).await;
    assert_eq!(
        error,
        SessionEvent::Error {
            session_id: id,
            message: "model overloaded".to_string()
        }
    );
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let err = manager
        .send_message(SendMessageRequest::new("missing", "ping"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestraError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_stream_events_are_tagged_with_session() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success(reply(THREAD_A, "pong"))),
        StaticProbe::passing(),
    );
    let id = manager.create_session(session_config()).await.unwrap();
    let mut global = manager.subscribe();
    let mut session = manager.subscribe_session(&id).unwrap();

    manager
        .send_message(SendMessageRequest::new(id.clone(), "ping"))
        .await
        .unwrap();

    let own: StreamingEvent =
        next_matching(&mut session, |e: &StreamingEvent| e.kind() == "session-result").await;
    assert_eq!(own.thread_id(), Some(&AgentThreadId::new(THREAD_A)));

    let tagged = next_matching(&mut global, |e| {
        e.stream_event().is_some_and(|s| s.kind() == "assistant-message-delta")
    })
    .await;
    assert_eq!(tagged.session_id(), &id);
}

#[tokio::test]
async fn test_destroy_is_idempotent_and_closes_session_feed() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let id = manager.create_session(session_config()).await.unwrap();
    let mut feed = manager.subscribe_session(&id).unwrap();

    assert!(manager.destroy_session(&id).await);
    assert!(!manager.destroy_session(&id).await);
    assert_eq!(manager.session_count(), 0);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Err(broadcast::error::RecvError::Closed) = feed.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session feed should close after destroy");
}

#[tokio::test]
async fn test_destroy_mid_turn_kills_process() {
    let spawner = ScriptedSpawner::always(Script::hanging());
    let manager = Arc::new(manager(hosted_config(4), spawner.clone(), StaticProbe::passing()));
    let id = manager.create_session(session_config()).await.unwrap();

    let turn = tokio::spawn({
        let manager = Arc::clone(&manager);
        let id = id.clone();
        async move { manager.send_message(SendMessageRequest::new(id, "ping")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.destroy_session(&id).await);

    let result = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn ends after destroy")
        .unwrap()
        .unwrap();
    assert!(!result.success);
    assert_eq!(spawner.kills.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nothing_is_published_after_destroyed() {
    let manager = Arc::new(manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::hanging()),
        StaticProbe::passing(),
    ));
    let id = manager.create_session(session_config()).await.unwrap();
    let mut events = manager.subscribe();

    let turn = tokio::spawn({
        let manager = Arc::clone(&manager);
        let id = id.clone();
        async move { manager.send_message(SendMessageRequest::new(id, "ping")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.destroy_session(&id).await);

    let result = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn ends after destroy")
        .unwrap()
        .unwrap();
    assert!(!result.success);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.session_id() == &id {
            seen.push(event);
        }
    }
    let destroyed = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::Destroyed { .. }))
        .expect("destroyed event");
    let after: Vec<_> = seen[destroyed + 1..].iter().collect();
    assert!(after.is_empty(), "events after Destroyed: {after:?}");
}

#[tokio::test]
async fn test_connection_change_restarts_sessions_in_place() {
    let spawner = ScriptedSpawner::always(Script::success(reply(THREAD_A, "pong")));
    let manager = manager(hosted_config(4), spawner.clone(), StaticProbe::passing());
    let kept_active = manager.create_session(session_config()).await.unwrap();
    let dir = PathBuf::from("/tmp/elsewhere");
    let kept_idle = manager
        .create_session(SessionConfig::builder(&dir).model("fast").build())
        .await
        .unwrap();
    manager.deactivate_session(&kept_idle).unwrap();
    manager.activate_session(&kept_active).unwrap();
    manager
        .send_message(SendMessageRequest::new(kept_active.clone(), "ping"))
        .await
        .unwrap();

    let capacity_only = OrchestraConfig {
        max_sessions: 8,
        ..hosted_config(4)
    };
    assert_eq!(manager.update_config(capacity_only).await.unwrap(), 0);

    let restarted = manager.update_config(local_config(8)).await.unwrap();
    assert_eq!(restarted, 2);

    let active = manager.session_info(&kept_active).unwrap();
    assert_eq!(active.state, SessionState::Active);
    assert!(active.pinned);
    assert_eq!(active.thread_id, None);
    let idle = manager.session_info(&kept_idle).unwrap();
    assert_eq!(idle.state, SessionState::Inactive);
    assert_eq!(idle.working_directory, dir);
    assert_eq!(idle.config.model.as_deref(), Some("fast"));

    manager
        .send_message(SendMessageRequest::new(kept_active, "after restart"))
        .await
        .unwrap();
    let last = spawner.commands().pop().unwrap();
    assert_eq!(last.program, PathBuf::from(LOCAL_AGENT));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let err = manager.update_config(hosted_config(0)).await.unwrap_err();
    assert!(matches!(err, OrchestraError::InvalidConfig(_)));
    assert_eq!(manager.config().max_sessions, 4);
}

#[tokio::test]
async fn test_cleanup_removes_only_idle_inactive_sessions() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    let idle = manager.create_session(session_config()).await.unwrap();
    let busy = manager.create_session(session_config()).await.unwrap();
    manager.deactivate_session(&idle).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(manager.cleanup_inactive_sessions(60).is_empty());
    assert_eq!(manager.cleanup_inactive_sessions(0), vec![idle]);
    assert_eq!(
        manager.list_sessions().iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
        vec![busy]
    );
}

#[tokio::test]
async fn test_metrics_track_sessions_and_turns() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::sequence(vec![
            Script::success(reply(THREAD_A, "pong")),
            Script::failure("model overloaded", 1),
        ]),
        StaticProbe::passing(),
    );
    let kept = manager.create_session(session_config()).await.unwrap();
    let dropped = manager.create_session(session_config()).await.unwrap();
    manager
        .send_message(SendMessageRequest::new(kept.clone(), "ping"))
        .await
        .unwrap();
    manager
        .send_message(SendMessageRequest::new(dropped.clone(), "ping"))
        .await
        .unwrap();
    manager.destroy_session(&dropped).await;

    let metrics = manager.metrics();
    assert_eq!(metrics.live_sessions, 1);
    assert_eq!(metrics.active_sessions, 0);
    assert_eq!(metrics.total_sessions_created, 2);
    assert_eq!(metrics.total_sessions_destroyed, 1);
    assert_eq!(metrics.total_turns_completed, 1);
    assert_eq!(metrics.total_turns_failed, 1);
    assert!(metrics.average_turn_duration.is_some());
}

#[tokio::test]
async fn test_shutdown_destroys_every_session() {
    let manager = manager(
        hosted_config(4),
        ScriptedSpawner::always(Script::success("")),
        StaticProbe::passing(),
    );
    manager.create_session(session_config()).await.unwrap();
    manager.create_session(session_config()).await.unwrap();

    manager.shutdown().await;
    assert_eq!(manager.session_count(), 0);
}
