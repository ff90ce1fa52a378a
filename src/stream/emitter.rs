//! Delta event emitter.
//!
//! Turns the engine's message revisions into wire events. Text payloads are
//! streamed as forward deltas against a per-message cache keyed by `ts`; the
//! cache entry is dropped on the terminal revision so the map only ever holds
//! messages that are still in flight.

use std::collections::HashMap;
use std::io::{self, Write};

use agent_core::{AgentMessage, AskKind, MessageKind, SayKind, TaskCompletedEvent};
use serde::Deserialize;
use serde_json::{Value, json};

use super::OutputSink;
use super::event::{
    Cost, EventType, FinalOutput, OutputFormat, PROTOCOL, QueueItem, SCHEMA_VERSION, StreamEvent,
    ToolResult, ToolUse,
};

const EXECUTE_COMMAND: &str = "execute_command";
const USE_MCP_SERVER: &str = "use_mcp_server";

#[derive(Debug, Default)]
struct DeltaEntry {
    /// Text already sent for this message.
    text: String,
    /// Last successful parse of `text` for JSON payloads.
    parsed: Option<Value>,
}

/// Usage record carried by `api_req_started` messages.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequestInfo {
    cost: Option<f64>,
    tokens_in: Option<u64>,
    tokens_out: Option<u64>,
    cache_writes: Option<u64>,
    cache_reads: Option<u64>,
}

impl From<ApiRequestInfo> for Cost {
    fn from(info: ApiRequestInfo) -> Self {
        Self {
            total_cost: info.cost,
            input_tokens: info.tokens_in,
            output_tokens: info.tokens_out,
            cache_writes: info.cache_writes,
            cache_reads: info.cache_reads,
        }
    }
}

/// Suffix of `current` beyond `previous`, or all of `current` when it does not
/// extend `previous`.
fn forward_delta<'a>(previous: &str, current: &'a str) -> &'a str {
    current.strip_prefix(previous).unwrap_or(current)
}

/// How a streamed tool payload is named.
#[derive(Debug, Clone, Copy)]
enum ToolPayload {
    /// `ask:tool`; the name is the payload's `tool` field.
    Tool,
    /// `ask:use_mcp_server`; the name is the MCP tool or server name.
    McpServer,
}

impl ToolPayload {
    const fn subtype(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::McpServer => USE_MCP_SERVER,
        }
    }

    fn name(self, parsed: &Value) -> Option<String> {
        let field = |key: &str| parsed.get(key).and_then(Value::as_str).map(str::to_string);
        match self {
            Self::Tool => field("tool"),
            Self::McpServer => field("toolName").or_else(|| field("serverName")),
        }
    }
}

/// Writes protocol events in `json` or `stream-json` mode.
///
/// All state lives here and is owned by a single task; callers serialize
/// access by construction.
pub struct JsonEventEmitter<W: Write> {
    format: OutputFormat,
    out: W,
    deltas: HashMap<u64, DeltaEntry>,
    pending_completion: Option<String>,
    cost: Cost,
    request_id: Option<String>,
    task_id: Option<String>,
    last_queue: Option<Vec<QueueItem>>,
    /// Buffered events in `json` mode.
    events: Vec<StreamEvent>,
    /// Last result seen, reported by `finish` in `json` mode.
    result: Option<StreamEvent>,
}

impl<W: Write> JsonEventEmitter<W> {
    #[must_use]
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self {
            format,
            out,
            deltas: HashMap::new(),
            pending_completion: None,
            cost: Cost::default(),
            request_id: None,
            task_id: None,
            last_queue: None,
            events: Vec::new(),
            result: None,
        }
    }

    /// Request whose work the following events belong to.
    pub fn set_request_id(&mut self, request_id: Option<String>) {
        self.request_id = request_id;
    }

    /// Task the following events belong to.
    pub fn set_task_id(&mut self, task_id: Option<String>) {
        self.task_id = task_id;
    }

    /// Drop everything collected for the current task: open delta entries,
    /// the cached completion text and accumulated cost.
    pub fn reset_task(&mut self) {
        self.deltas.clear();
        self.pending_completion = None;
        self.cost = Cost::default();
    }

    /// Number of messages with an open delta cache entry.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.deltas.len()
    }

    #[must_use]
    pub const fn get_ref(&self) -> &W {
        &self.out
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write the leading `system` event.
    pub fn emit_init(&mut self, capabilities: &[&str]) -> io::Result<()> {
        let mut event = StreamEvent::new(EventType::System).with_subtype("init");
        event.schema_version = Some(SCHEMA_VERSION);
        event.protocol = Some(PROTOCOL.to_string());
        event.capabilities = Some(capabilities.iter().map(ToString::to_string).collect());
        self.write_event(event)
    }

    /// Write a `control` event as built by the caller.
    ///
    /// Control events carry their own `requestId` and are never stamped with
    /// the current one.
    pub fn emit_control(&mut self, event: StreamEvent) -> io::Result<()> {
        self.write_event(event)
    }

    /// Write a `queue` snapshot if it differs from the last one written.
    pub fn emit_queue(&mut self, items: Vec<QueueItem>) -> io::Result<()> {
        if self.last_queue.as_ref() == Some(&items) {
            return Ok(());
        }

        let mut event = StreamEvent::new(EventType::Queue).with_subtype("snapshot");
        event.queue_depth = Some(items.len());
        event.queue = Some(items.clone());
        self.last_queue = Some(items);
        self.emit(event)
    }

    /// Write a runtime `error` event.
    pub fn emit_error(&mut self, message: &str) -> io::Result<()> {
        let id = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        self.emit(
            StreamEvent::new(EventType::Error)
                .with_id(id)
                .with_content(message),
        )
    }

    /// Write a failed `result` after an engine error.
    pub fn emit_failure_result(&mut self, message: &str) -> io::Result<()> {
        self.pending_completion = None;
        let mut event = StreamEvent::new(EventType::Result).with_content(message);
        event.success = Some(false);
        event.cost = self.take_cost();
        self.emit_result(event)
    }

    /// Write the result of a completed task.
    ///
    /// The completing message's own text wins; otherwise the last cached
    /// `say:completion_result` text is used. The cache is cleared either way.
    pub fn handle_task_completed(&mut self, completed: &TaskCompletedEvent) -> io::Result<()> {
        let pending = self.pending_completion.take();
        let current = completed
            .message
            .as_ref()
            .map(AgentMessage::text)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string);

        let mut event = StreamEvent::new(EventType::Result);
        event.id = completed.message.as_ref().map(|m| m.ts);
        event.content = current.or(pending);
        event.success = Some(completed.success);
        event.cost = self.take_cost();
        self.emit_result(event)
    }

    /// Translate one message revision into zero or more events.
    pub fn handle_message(&mut self, message: &AgentMessage) -> io::Result<()> {
        match &message.kind {
            MessageKind::Say(say) => self.handle_say(say, message),
            MessageKind::Ask(ask) => self.handle_ask(ask, message),
        }
    }

    /// Flush output; in `json` mode this writes the single final object.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.format == OutputFormat::Json {
            let result = self.result.take();
            let output = FinalOutput {
                event_type: EventType::Result,
                success: result.as_ref().and_then(|r| r.success).unwrap_or(false),
                content: result.as_ref().and_then(|r| r.content.clone()),
                cost: result.and_then(|r| r.cost),
                events: std::mem::take(&mut self.events),
            };
            let line = serde_json::to_string(&output)?;
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }

    fn handle_say(&mut self, say: &SayKind, message: &AgentMessage) -> io::Result<()> {
        match say {
            SayKind::Text => self.stream_text(EventType::Assistant, message),
            SayKind::Reasoning => self.stream_text(EventType::Thinking, message),
            SayKind::CompletionResult => {
                if !message.text().trim().is_empty() {
                    self.pending_completion = Some(message.text().to_string());
                }
                Ok(())
            }
            SayKind::ApiReqStarted => {
                if !message.partial {
                    match serde_json::from_str::<ApiRequestInfo>(message.text()) {
                        Ok(info) => self.cost.accumulate(&info.into()),
                        Err(e) => tracing::debug!(ts = message.ts, "unparsed api request: {e}"),
                    }
                }
                Ok(())
            }
            SayKind::CommandOutput => self.tool_result(EXECUTE_COMMAND, message),
            SayKind::McpServerResponse => self.tool_result(USE_MCP_SERVER, message),
            SayKind::Error => self.final_only(StreamEvent::new(EventType::Error), message),
            SayKind::UserFeedback => self.final_only(StreamEvent::new(EventType::User), message),
            SayKind::ApiReqFinished | SayKind::CheckpointSaved | SayKind::Unknown(_) => {
                tracing::trace!(ts = message.ts, say = %say, "say not mapped to an event");
                Ok(())
            }
        }
    }

    fn handle_ask(&mut self, ask: &AskKind, message: &AgentMessage) -> io::Result<()> {
        match ask {
            AskKind::Command => self.stream_command(message),
            AskKind::Tool => self.stream_tool(ToolPayload::Tool, message),
            AskKind::UseMcpServer => self.stream_tool(ToolPayload::McpServer, message),
            AskKind::Followup => self.final_only(
                StreamEvent::new(EventType::Assistant).with_subtype(ask.as_str()),
                message,
            ),
            AskKind::ApiReqFailed | AskKind::MistakeLimitReached => self.final_only(
                StreamEvent::new(EventType::Error).with_subtype(ask.as_str()),
                message,
            ),
            AskKind::CompletionResult | AskKind::ResumeCompletedTask => Ok(()),
            AskKind::CommandOutput
            | AskKind::ResumeTask
            | AskKind::BrowserActionLaunch
            | AskKind::AutoApprovalMaxReqReached
            | AskKind::Unknown(_) => {
                tracing::trace!(ts = message.ts, ask = %ask, "ask not mapped to an event");
                Ok(())
            }
        }
    }

    /// Advance the cache for `message` and return the unsent suffix.
    ///
    /// A terminal revision evicts the entry. `None` means a partial revision
    /// that adds nothing and must not produce an event.
    fn advance(&mut self, message: &AgentMessage) -> Option<(String, Option<Value>)> {
        let text = message.text();
        if message.partial {
            let entry = self.deltas.entry(message.ts).or_default();
            let delta = forward_delta(&entry.text, text);
            if delta.is_empty() {
                return None;
            }
            let delta = delta.to_string();
            entry.text = text.to_string();
            Some((delta, entry.parsed.clone()))
        } else {
            let entry = self.deltas.remove(&message.ts).unwrap_or_default();
            let delta = forward_delta(&entry.text, text).to_string();
            Some((delta, entry.parsed))
        }
    }

    fn stream_text(&mut self, event_type: EventType, message: &AgentMessage) -> io::Result<()> {
        let Some((delta, _)) = self.advance(message) else {
            return Ok(());
        };

        let event = StreamEvent::new(event_type)
            .with_id(message.ts)
            .with_content(delta);
        if message.partial {
            self.emit(event)
        } else {
            self.emit(event.finished())
        }
    }

    fn stream_command(&mut self, message: &AgentMessage) -> io::Result<()> {
        let Some((delta, _)) = self.advance(message) else {
            return Ok(());
        };

        let mut event = StreamEvent::new(EventType::ToolUse)
            .with_id(message.ts)
            .with_subtype("command");
        if message.partial {
            event.tool_use = Some(ToolUse {
                name: EXECUTE_COMMAND.to_string(),
                input: Some(json!({ "command": delta })),
            });
            self.emit(event.with_content(delta))
        } else {
            event.tool_use = Some(ToolUse {
                name: EXECUTE_COMMAND.to_string(),
                input: Some(json!({ "command": message.text() })),
            });
            self.emit(event.finished())
        }
    }

    fn stream_tool(&mut self, payload: ToolPayload, message: &AgentMessage) -> io::Result<()> {
        let text = message.text();
        let event = StreamEvent::new(EventType::ToolUse)
            .with_id(message.ts)
            .with_subtype(payload.subtype());

        if message.partial {
            let Some((delta, _)) = self.advance(message) else {
                return Ok(());
            };
            // accumulated text is only sometimes valid JSON mid-stream
            let parsed = match serde_json::from_str::<Value>(text) {
                Ok(value) => {
                    let entry = self.deltas.entry(message.ts).or_default();
                    entry.parsed = Some(value);
                    entry.parsed.clone()
                }
                Err(_) => self.deltas.get(&message.ts).and_then(|e| e.parsed.clone()),
            };

            let mut event = event.with_content(delta);
            event.tool_use = parsed
                .as_ref()
                .and_then(|value| payload.name(value))
                .map(|name| ToolUse { name, input: None });
            return self.emit(event);
        }

        let (_, cached) = self.advance(message).unwrap_or_default();
        let input = serde_json::from_str::<Value>(text)
            .ok()
            .or(cached)
            .unwrap_or_else(|| json!({ "raw": text }));
        let name = payload
            .name(&input)
            .unwrap_or_else(|| payload.subtype().to_string());

        let mut event = event.finished();
        event.tool_use = Some(ToolUse {
            name,
            input: Some(input),
        });
        self.emit(event)
    }

    fn tool_result(&mut self, name: &str, message: &AgentMessage) -> io::Result<()> {
        if message.partial {
            return Ok(());
        }
        let mut event = StreamEvent::new(EventType::ToolResult)
            .with_id(message.ts)
            .finished();
        event.tool_result = Some(ToolResult {
            name: name.to_string(),
            output: Some(message.text().to_string()),
            error: None,
        });
        self.emit(event)
    }

    fn final_only(&mut self, event: StreamEvent, message: &AgentMessage) -> io::Result<()> {
        if message.partial {
            return Ok(());
        }
        self.emit(
            event
                .with_id(message.ts)
                .with_content(message.text())
                .finished(),
        )
    }

    fn take_cost(&mut self) -> Option<Cost> {
        let cost = std::mem::take(&mut self.cost);
        (!cost.is_empty()).then_some(cost)
    }

    fn emit_result(&mut self, event: StreamEvent) -> io::Result<()> {
        self.result = Some(event.clone());
        self.emit(event)
    }

    /// Stamp request and task identifiers, then write.
    fn emit(&mut self, mut event: StreamEvent) -> io::Result<()> {
        if event.request_id.is_none() {
            event.request_id.clone_from(&self.request_id);
        }
        if event.task_id.is_none() {
            event.task_id.clone_from(&self.task_id);
        }
        self.write_event(event)
    }

    fn write_event(&mut self, event: StreamEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                self.events.push(event);
                Ok(())
            }
            OutputFormat::StreamJson | OutputFormat::Text => {
                let line = serde_json::to_string(&event)?;
                writeln!(self.out, "{line}")?;
                self.out.flush()
            }
        }
    }
}

impl<W: Write> OutputSink for JsonEventEmitter<W> {
    fn on_message(&mut self, message: &AgentMessage) -> io::Result<()> {
        self.handle_message(message)
    }

    fn on_task_completed(&mut self, completed: &TaskCompletedEvent) -> io::Result<()> {
        self.handle_task_completed(completed)
    }

    fn on_failure(&mut self, message: &str) -> io::Result<()> {
        self.emit_error(message)?;
        self.emit_failure_result(message)
    }

    fn on_queue(&mut self, items: Vec<QueueItem>) -> io::Result<()> {
        self.emit_queue(items)
    }

    fn set_task(&mut self, task_id: &str) {
        self.set_task_id(Some(task_id.to_string()));
    }

    fn finish(&mut self) -> io::Result<()> {
        Self::finish(self)
    }
}
