//! Turn execution: one process per attempt, wrapped in the retry loop

use futures::StreamExt;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::codec::FramedRead;

use super::ProcessOrchestrator;
use super::retry::{ErrorClass, classify};
use crate::message::{ParserState, StreamEventCodec, strip_ansi};
use crate::transport::subprocess::CommandBuilder;
use crate::types::events::{EventPayload, StreamingEvent};
use crate::types::identifiers::AgentThreadId;
use crate::types::options::TurnRequest;
use crate::types::result::OrchestrationResult;

/// What one process invocation produced
#[derive(Debug, Default)]
struct AttemptOutcome {
    exit_code: Option<i32>,
    stderr: String,
    /// Error text reported in-band on stdout
    reported_errors: Vec<String>,
    /// Failure before or while talking to the process
    launch_error: Option<String>,
    thread_id: Option<AgentThreadId>,
    events: Vec<StreamingEvent>,
    cancelled: bool,
}

impl AttemptOutcome {
    fn succeeded(&self) -> bool {
        self.launch_error.is_none() && !self.cancelled && self.exit_code == Some(0)
    }

    /// Error reported to the caller
    fn error_message(&self) -> String {
        if let Some(ref err) = self.launch_error {
            return err.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Everything the classifier should look at
    fn failure_text(&self) -> String {
        let mut text = self.error_message();
        for reported in &self.reported_errors {
            text.push('\n');
            text.push_str(reported);
        }
        text
    }
}

impl ProcessOrchestrator {
    /// Run one turn with retries
    ///
    /// Turns on the same orchestrator are serialized.
    pub(super) async fn run_turn(
        &self,
        turn: &TurnRequest,
        thread_id: Option<&AgentThreadId>,
    ) -> OrchestrationResult {
        let _turn_guard = self.turn_lock.lock().await;
        let mut result = OrchestrationResult::default();
        let mut auth_retried = false;

        loop {
            if self.cancel.is_cancelled() {
                result.success = false;
                result.error = Some("session was shut down".to_string());
                return result;
            }

            result.attempts += 1;
            let attempt = result.attempts;
            let outcome = self.run_attempt(turn, thread_id).await;
            let succeeded = outcome.succeeded();
            let error = (!succeeded).then(|| outcome.error_message());
            let failure_text = outcome.failure_text();

            result.events.extend(outcome.events);
            result.exit_code = outcome.exit_code;
            result.stderr = Some(outcome.stderr.trim().to_string()).filter(|s| !s.is_empty());
            if result.thread_id.is_none() {
                result.thread_id = outcome.thread_id.or_else(|| thread_id.cloned());
            }

            if succeeded {
                result.success = true;
                result.error = None;
                log::debug!("Turn succeeded after {attempt} attempt(s)");
                return result;
            }
            result.success = false;
            result.error = error;

            if outcome.cancelled {
                return result;
            }

            let has_more = self.options.retry.has_attempts_after(attempt);
            match classify(&failure_text) {
                ErrorClass::Auth => {
                    let message = result.error.clone().unwrap_or_default();
                    self.authenticated.store(false, Ordering::SeqCst);
                    self.emit(
                        StreamingEvent::now(EventPayload::AuthError { message }),
                        &mut result.events,
                    );

                    if auth_retried || !self.connection.requires_auth() {
                        log::warn!("Authentication rejected; not retrying");
                        return result;
                    }
                    auth_retried = true;

                    let probe = self.run_probe().await;
                    self.emit_connection_info(&mut result.events);
                    if let Err(e) = probe {
                        log::warn!("Re-probe failed, giving up on turn: {e}");
                        return result;
                    }
                    if !has_more {
                        return result;
                    }
                    log::info!("Re-authenticated; retrying turn (attempt {})", attempt + 1);
                }
                ErrorClass::Transient if has_more => {
                    let delay = self.options.retry.delay_after(attempt);
                    log::info!(
                        "Transient failure on attempt {attempt}, retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return result,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                class => {
                    log::debug!("Not retrying {class:?} failure on attempt {attempt}");
                    return result;
                }
            }
        }
    }

    /// Spawn the agent once and stream its output
    async fn run_attempt(
        &self,
        turn: &TurnRequest,
        thread_id: Option<&AgentThreadId>,
    ) -> AttemptOutcome {
        let mut outcome = AttemptOutcome::default();

        let spec = match CommandBuilder::new(&self.connection, &self.config, turn)
            .continuing(thread_id)
            .build(self.environment())
        {
            Ok(spec) => spec,
            Err(e) => {
                outcome.launch_error = Some(e.to_string());
                return outcome;
            }
        };

        let mut process = match self.spawner.spawn(&spec) {
            Ok(process) => process,
            Err(e) => {
                log::warn!("Failed to spawn agent: {e}");
                outcome.launch_error = Some(e.to_string());
                return outcome;
            }
        };

        let writer = process.stdin.take().map(|mut stdin| {
            let prompt = turn.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    log::debug!("Agent closed stdin early: {e}");
                }
                let _ = stdin.shutdown().await;
            })
        });

        let state = ParserState {
            line_prefix: self.options.line_prefix.clone(),
            ..ParserState::default()
        };
        let mut stdout = FramedRead::new(process.stdout, StreamEventCodec::new(state));
        let mut stderr = BufReader::new(process.stderr).split(b'\n');
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                frame = stdout.next(), if stdout_open => match frame {
                    Some(Ok(events)) => {
                        for event in events {
                            self.record(event, &mut outcome);
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("Error reading agent stdout: {e}");
                        stdout_open = false;
                    }
                    None => stdout_open = false,
                },
                line = stderr.next_segment(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        let clean = strip_ansi(&String::from_utf8_lossy(&line));
                        outcome.stderr.push_str(&clean);
                        outcome.stderr.push('\n');
                        if !clean.trim().is_empty() {
                            let event = StreamingEvent::now(EventPayload::error_output(clean));
                            self.emit(event, &mut outcome.events);
                        }
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        log::warn!("Error reading agent stderr: {e}");
                        stderr_open = false;
                    }
                },
            }
        }

        if !outcome.cancelled {
            let status = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                status = process.handle.wait() => Some(status),
            };
            match status {
                Some(Ok(code)) => outcome.exit_code = code,
                Some(Err(e)) => outcome.launch_error = Some(format!("failed to wait for agent: {e}")),
                None => outcome.cancelled = true,
            }
        }

        if outcome.cancelled {
            log::info!("Turn cancelled; killing agent process");
            if let Err(e) = process.handle.start_kill() {
                log::warn!("Failed to kill agent process: {e}");
            }
            outcome.launch_error = Some("turn cancelled".to_string());
        }
        if let Some(writer) = writer {
            writer.abort();
        }

        outcome
    }

    fn record(&self, event: StreamingEvent, outcome: &mut AttemptOutcome) {
        if outcome.thread_id.is_none()
            && let Some(id) = event.thread_id()
        {
            outcome.thread_id = Some(id.clone());
        }
        match &event.payload {
            EventPayload::ErrorOutput { content } => outcome.reported_errors.push(content.clone()),
            EventPayload::SessionResult {
                is_error: true,
                result: Some(text),
                ..
            } => outcome.reported_errors.push(text.clone()),
            _ => {}
        }
        self.emit(event, &mut outcome.events);
    }
}
