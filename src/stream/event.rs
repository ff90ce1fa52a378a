//! Wire types of the streaming protocol.
//!
//! One [`StreamEvent`] is written per line in `stream-json` mode. Optional
//! fields are omitted from the output when unset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the event schema announced by the `system` init event.
pub const SCHEMA_VERSION: u32 = 1;

/// Transport protocol identifier announced by the `system` init event.
pub const PROTOCOL: &str = "omni-stream-json";

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Text,
    /// A single JSON object written when the process ends.
    Json,
    /// One JSON object per line, written as events happen.
    StreamJson,
}

impl OutputFormat {
    /// Whether this format writes JSON to stdout.
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::StreamJson)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "stream-json" => Ok(Self::StreamJson),
            other => Err(format!(
                "invalid output format: {other}; must be one of: text, json, stream-json"
            )),
        }
    }
}

/// Event type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    System,
    Control,
    Queue,
    Assistant,
    User,
    ToolUse,
    ToolResult,
    Thinking,
    Error,
    Result,
}

/// Subtype of a `control` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSubtype {
    /// The command was accepted; work is in progress.
    Ack,
    /// The command's work resolved.
    Done,
    /// The command was rejected.
    Error,
}

impl ControlSubtype {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Tool invocation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Tool result descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cost and token usage of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_writes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_reads: Option<u64>,
}

impl Cost {
    /// Whether no field has been recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_cost.is_none()
            && self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.cache_writes.is_none()
            && self.cache_reads.is_none()
    }

    /// Add another cost record field by field.
    pub fn accumulate(&mut self, other: &Self) {
        fn add<T: Copy + std::ops::Add<Output = T>>(total: &mut Option<T>, value: Option<T>) {
            if let Some(value) = value {
                *total = Some(total.map_or(value, |t| t + value));
            }
        }

        add(&mut self.total_cost, other.total_cost);
        add(&mut self.input_tokens, other.input_tokens);
        add(&mut self.output_tokens, other.output_tokens);
        add(&mut self.cache_writes, other.cache_writes);
        add(&mut self.cache_reads, other.cache_reads);
    }
}

/// One queued user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// A protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(rename = "queueDepth", skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<Vec<QueueItem>>,
    #[serde(rename = "schemaVersion", skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

impl StreamEvent {
    /// Create an event with only its type set.
    #[must_use]
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            subtype: None,
            id: None,
            task_id: None,
            request_id: None,
            command: None,
            code: None,
            content: None,
            done: None,
            success: None,
            queue_depth: None,
            queue: None,
            schema_version: None,
            protocol: None,
            capabilities: None,
            tool_use: None,
            tool_result: None,
            cost: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Set `content`, leaving it absent when the text is empty.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.content = (!content.is_empty()).then_some(content);
        self
    }

    /// Create a `control` event answering a stdin request.
    #[must_use]
    pub fn control(subtype: ControlSubtype, request_id: Option<&str>) -> Self {
        let mut event = Self::new(EventType::Control).with_subtype(subtype.as_str());
        event.request_id = request_id.map(str::to_string);
        event
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Mark the event as the final revision of its message.
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.done = Some(true);
        self
    }
}

/// Single object written at the end of `json` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    pub events: Vec<StreamEvent>,
}
