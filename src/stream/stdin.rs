//! Stdin command loop.
//!
//! Reads NDJSON commands and drives the engine while answering each command
//! with `control` events correlated by `requestId`. Commands and engine events
//! are handled by one loop, so the emitter and its delta cache have a single
//! owner.

use std::io::{self, Write};
use std::sync::Arc;

use agent_core::{AskResponse, Engine, EngineEvent, EngineEvents, ExtensionMessage};
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::command::{CommandError, CommandName, InputCommand, parse_command};
use super::emitter::JsonEventEmitter;
use super::event::{ControlSubtype, QueueItem, StreamEvent};
use crate::core::client::AgentClient;

/// Capabilities announced in the `system` init event.
pub const STDIN_CAPABILITIES: &[&str] = &[
    "stdin:start",
    "stdin:message",
    "stdin:cancel",
    "stdin:ping",
    "stdin:shutdown",
];

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No task is active.
    Idle,
    /// A task started by `start` is active.
    Running,
    /// Shutdown was requested; nothing new is accepted.
    Terminating,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A `shutdown` command was processed.
    Shutdown,
    /// Stdin reached end of file or failed.
    InputClosed,
    /// The engine event channel closed.
    EngineClosed,
}

#[derive(Debug)]
struct ActiveTask {
    request_id: String,
}

/// State owned by the stdin loop.
pub struct StdinSession<W: Write> {
    engine: Arc<dyn Engine>,
    emitter: JsonEventEmitter<W>,
    client: AgentClient,
    state: SessionState,
    active: Option<ActiveTask>,
}

/// Queue snapshot carried by an engine `state` broadcast.
#[must_use]
pub fn queue_snapshot(message: &Value) -> Option<Vec<QueueItem>> {
    if message.get("type").and_then(Value::as_str) != Some("state") {
        return None;
    }
    let queue = message.get("state")?.get("messageQueue")?.as_array()?;

    Some(
        queue
            .iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_str)?;
                Some(QueueItem {
                    id: id.to_string(),
                    text: item.get("text").and_then(Value::as_str).map(str::to_string),
                    image_count: item
                        .get("images")
                        .and_then(Value::as_array)
                        .map(|images| images.len() as u64),
                    timestamp: item.get("timestamp").and_then(Value::as_u64),
                })
            })
            .collect(),
    )
}

impl<W: Write> StdinSession<W> {
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, emitter: JsonEventEmitter<W>) -> Self {
        Self {
            engine,
            emitter,
            client: AgentClient::new(),
            state: SessionState::Idle,
            active: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn emitter(&self) -> &JsonEventEmitter<W> {
        &self.emitter
    }

    #[must_use]
    pub fn into_emitter(self) -> JsonEventEmitter<W> {
        self.emitter
    }

    /// Run until shutdown, end of input, or loss of the engine.
    ///
    /// Pending engine events are drained before the next command is read so
    /// that events caused by one command precede the next command's replies.
    pub async fn run<S>(&mut self, mut input: S, mut events: EngineEvents) -> io::Result<SessionEnd>
    where
        S: Stream<Item = io::Result<String>> + Unpin,
    {
        self.emitter.emit_init(STDIN_CAPABILITIES)?;

        let end = loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("engine event channel closed");
                        self.fail_active("engine event channel closed")?;
                        break SessionEnd::EngineClosed;
                    };
                    self.handle_engine_event(event)?;
                }
                line = input.next() => match line {
                    Some(Ok(line)) => {
                        if let Some(end) = self.handle_line(&line).await? {
                            break end;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "failed to read stdin");
                        self.terminate(None).await?;
                        break SessionEnd::InputClosed;
                    }
                    None => {
                        tracing::debug!("stdin closed");
                        self.terminate(None).await?;
                        break SessionEnd::InputClosed;
                    }
                },
            }
        };

        self.emitter.finish()?;
        Ok(end)
    }

    /// Handle one stdin line; returns `Some` when the loop must stop.
    pub async fn handle_line(&mut self, line: &str) -> io::Result<Option<SessionEnd>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(code = e.code(), "rejected stdin line: {e}");
                self.reject_invalid(&e)?;
                return Ok(None);
            }
        };

        let name = command.name();
        tracing::debug!(request_id = command.request_id(), command = %name, "stdin command");

        if self.state == SessionState::Terminating && name != CommandName::Ping {
            self.reject(
                command.request_id(),
                name,
                "shutting_down",
                "session is shutting down",
            )?;
            return Ok(None);
        }

        match command {
            InputCommand::Start {
                request_id,
                prompt,
                configuration,
            } => self.start(request_id, &prompt, configuration).await?,
            InputCommand::Message { request_id, prompt } => {
                self.message(&request_id, prompt).await?;
            }
            InputCommand::Cancel { request_id } => self.cancel(&request_id).await?,
            InputCommand::Ping { request_id } => {
                self.done(&request_id, name, true, "pong", None)?;
            }
            InputCommand::Shutdown { request_id } => {
                self.ack(&request_id, name)?;
                self.terminate(Some(&request_id)).await?;
                return Ok(Some(SessionEnd::Shutdown));
            }
        }
        Ok(None)
    }

    /// Feed one engine event through the client and the emitter.
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> io::Result<()> {
        match event {
            EngineEvent::Message(message) => {
                self.emitter.handle_message(&message)?;
                if let Some(completed) = self.client.handle_message(message) {
                    self.emitter.handle_task_completed(&completed)?;
                    if let Some(task) = self.finish_task() {
                        let code = if completed.success {
                            "task_completed"
                        } else {
                            "task_failed"
                        };
                        self.done(
                            &task.request_id,
                            CommandName::Start,
                            completed.success,
                            code,
                            None,
                        )?;
                    }
                }
            }
            EngineEvent::Error(message) => {
                tracing::warn!(error = %message, "engine error");
                self.emitter.emit_error(&message)?;
                self.fail_active(&message)?;
            }
            EngineEvent::Extension(message) => {
                if let Some(items) = queue_snapshot(&message) {
                    self.emitter.emit_queue(items)?;
                }
            }
        }
        Ok(())
    }

    async fn start(
        &mut self,
        request_id: String,
        prompt: &str,
        configuration: Option<Value>,
    ) -> io::Result<()> {
        if self.active.is_some() {
            return self.reject(
                &request_id,
                CommandName::Start,
                "task_already_active",
                "a task is already running",
            );
        }

        self.ack(&request_id, CommandName::Start)?;
        self.client.reset();
        self.emitter.reset_task();
        self.emitter.set_request_id(Some(request_id.clone()));
        self.active = Some(ActiveTask {
            request_id: request_id.clone(),
        });
        self.state = SessionState::Running;

        if let Err(e) = self.engine.run_task(prompt, configuration).await {
            tracing::warn!(request_id = %request_id, error = %e, "failed to start task");
            self.finish_task();
            self.done(
                &request_id,
                CommandName::Start,
                false,
                "engine_error",
                Some(&e.to_string()),
            )?;
        }
        Ok(())
    }

    async fn message(&mut self, request_id: &str, prompt: String) -> io::Result<()> {
        if self.active.is_none() {
            return self.reject(
                request_id,
                CommandName::Message,
                "no_active_task",
                "no task is running",
            );
        }

        self.ack(request_id, CommandName::Message)?;

        // a pending question takes the message as its answer
        let message = if self.client.state().is_waiting_for_input {
            ExtensionMessage::AskResponse {
                response: AskResponse::MessageResponse,
                text: Some(prompt),
            }
        } else {
            ExtensionMessage::QueueMessage { text: prompt }
        };

        match self.engine.send_to_extension(message).await {
            Ok(()) => self.done(request_id, CommandName::Message, true, "message_sent", None),
            Err(e) => self.done(
                request_id,
                CommandName::Message,
                false,
                "engine_error",
                Some(&e.to_string()),
            ),
        }
    }

    async fn cancel(&mut self, request_id: &str) -> io::Result<()> {
        if self.active.is_none() {
            return self.reject(
                request_id,
                CommandName::Cancel,
                "no_active_task",
                "no task is running",
            );
        }

        self.ack(request_id, CommandName::Cancel)?;

        if let Err(e) = self
            .engine
            .send_to_extension(ExtensionMessage::CancelTask)
            .await
        {
            return self.done(
                request_id,
                CommandName::Cancel,
                false,
                "engine_error",
                Some(&e.to_string()),
            );
        }

        self.done(request_id, CommandName::Cancel, true, "cancel_requested", None)?;
        if let Some(task) = self.finish_task() {
            self.done(
                &task.request_id,
                CommandName::Start,
                false,
                "task_cancelled",
                None,
            )?;
        }
        Ok(())
    }

    /// Stop accepting work and cancel the active task, if any.
    async fn terminate(&mut self, shutdown_request: Option<&str>) -> io::Result<()> {
        self.state = SessionState::Terminating;

        if let Some(task) = self.active.take() {
            if let Err(e) = self
                .engine
                .send_to_extension(ExtensionMessage::CancelTask)
                .await
            {
                tracing::debug!(error = %e, "cancel on shutdown failed");
            }
            self.emitter.reset_task();
            self.emitter.set_request_id(None);
            self.done(&task.request_id, CommandName::Start, false, "shutdown", None)?;
        }

        if let Some(request_id) = shutdown_request {
            self.done(
                request_id,
                CommandName::Shutdown,
                true,
                "shutting_down",
                None,
            )?;
        }
        Ok(())
    }

    fn fail_active(&mut self, message: &str) -> io::Result<()> {
        if self.active.is_none() {
            return Ok(());
        }

        self.emitter.emit_failure_result(message)?;
        if let Some(task) = self.finish_task() {
            self.done(
                &task.request_id,
                CommandName::Start,
                false,
                "task_failed",
                Some(message),
            )?;
        }
        Ok(())
    }

    /// Leave the active task and drop its per-task emitter state.
    fn finish_task(&mut self) -> Option<ActiveTask> {
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
        }
        self.emitter.reset_task();
        self.emitter.set_request_id(None);
        self.active.take()
    }

    fn ack(&mut self, request_id: &str, command: CommandName) -> io::Result<()> {
        self.emitter.emit_control(
            StreamEvent::control(ControlSubtype::Ack, Some(request_id))
                .with_command(command.as_str())
                .with_code("accepted"),
        )
    }

    fn done(
        &mut self,
        request_id: &str,
        command: CommandName,
        success: bool,
        code: &str,
        content: Option<&str>,
    ) -> io::Result<()> {
        self.emitter.emit_control(
            StreamEvent::control(ControlSubtype::Done, Some(request_id))
                .with_command(command.as_str())
                .with_code(code)
                .with_success(success)
                .with_content(content.unwrap_or_default()),
        )
    }

    fn reject(
        &mut self,
        request_id: &str,
        command: CommandName,
        code: &str,
        message: &str,
    ) -> io::Result<()> {
        self.emitter.emit_control(
            StreamEvent::control(ControlSubtype::Error, Some(request_id))
                .with_command(command.as_str())
                .with_code(code)
                .with_success(false)
                .with_content(message),
        )
    }

    fn reject_invalid(&mut self, error: &CommandError) -> io::Result<()> {
        let mut event = StreamEvent::control(ControlSubtype::Error, error.request_id())
            .with_code(error.code())
            .with_success(false)
            .with_content(error.to_string());
        event.command = error.command().map(str::to_string);
        self.emitter.emit_control(event)
    }
}
