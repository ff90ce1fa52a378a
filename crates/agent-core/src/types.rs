//! Agent message model.
//!
//! The engine produces a loosely shaped record per message revision. It is
//! decoded here into a closed union keyed by `(type, subtype)` so that the
//! classifier and the emitter match every case exhaustively.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Subtype of a narrative (`say`) message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SayKind {
    /// Free-form assistant text.
    Text,
    /// Model reasoning text.
    Reasoning,
    /// Final answer text of a task, usually followed by a completion ask.
    CompletionResult,
    /// API request bookkeeping; the text is a JSON payload with cost and usage.
    ApiReqStarted,
    /// API request finished marker.
    ApiReqFinished,
    /// Output captured from a shell command.
    CommandOutput,
    /// Error surfaced by the engine.
    Error,
    /// Feedback typed by the user.
    UserFeedback,
    /// Response from an MCP server tool.
    McpServerResponse,
    /// A checkpoint was saved.
    CheckpointSaved,
    /// Any subtype this build does not know about.
    Unknown(String),
}

impl SayKind {
    /// Wire name of the subtype.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Reasoning => "reasoning",
            Self::CompletionResult => "completion_result",
            Self::ApiReqStarted => "api_req_started",
            Self::ApiReqFinished => "api_req_finished",
            Self::CommandOutput => "command_output",
            Self::Error => "error",
            Self::UserFeedback => "user_feedback",
            Self::McpServerResponse => "mcp_server_response",
            Self::CheckpointSaved => "checkpoint_saved",
            Self::Unknown(other) => other,
        }
    }
}

impl From<&str> for SayKind {
    fn from(value: &str) -> Self {
        match value {
            "text" => Self::Text,
            "reasoning" => Self::Reasoning,
            "completion_result" => Self::CompletionResult,
            "api_req_started" => Self::ApiReqStarted,
            "api_req_finished" => Self::ApiReqFinished,
            "command_output" => Self::CommandOutput,
            "error" => Self::Error,
            "user_feedback" => Self::UserFeedback,
            "mcp_server_response" => Self::McpServerResponse,
            "checkpoint_saved" => Self::CheckpointSaved,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Subtype of a decision-point (`ask`) message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AskKind {
    /// Clarifying question for the user.
    Followup,
    /// Approval for a shell command; the text is the command line.
    Command,
    /// A running command produced output and may be continued.
    CommandOutput,
    /// The task finished.
    CompletionResult,
    /// Approval for a tool call; the text is a JSON tool payload.
    Tool,
    /// An API request failed and the engine needs a decision.
    ApiReqFailed,
    /// An interrupted task can be resumed.
    ResumeTask,
    /// A finished task was reopened.
    ResumeCompletedTask,
    /// The engine hit its consecutive mistake limit.
    MistakeLimitReached,
    /// Approval to launch a browser.
    BrowserActionLaunch,
    /// Approval for an MCP server call; the text is a JSON payload.
    UseMcpServer,
    /// The auto-approval request budget is spent.
    AutoApprovalMaxReqReached,
    /// Any subtype this build does not know about.
    Unknown(String),
}

impl AskKind {
    /// Wire name of the subtype.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Followup => "followup",
            Self::Command => "command",
            Self::CommandOutput => "command_output",
            Self::CompletionResult => "completion_result",
            Self::Tool => "tool",
            Self::ApiReqFailed => "api_req_failed",
            Self::ResumeTask => "resume_task",
            Self::ResumeCompletedTask => "resume_completed_task",
            Self::MistakeLimitReached => "mistake_limit_reached",
            Self::BrowserActionLaunch => "browser_action_launch",
            Self::UseMcpServer => "use_mcp_server",
            Self::AutoApprovalMaxReqReached => "auto_approval_max_req_reached",
            Self::Unknown(other) => other,
        }
    }
}

impl From<&str> for AskKind {
    fn from(value: &str) -> Self {
        match value {
            "followup" => Self::Followup,
            "command" => Self::Command,
            "command_output" => Self::CommandOutput,
            "completion_result" => Self::CompletionResult,
            "tool" => Self::Tool,
            "api_req_failed" => Self::ApiReqFailed,
            "resume_task" => Self::ResumeTask,
            "resume_completed_task" => Self::ResumeCompletedTask,
            "mistake_limit_reached" => Self::MistakeLimitReached,
            "browser_action_launch" => Self::BrowserActionLaunch,
            "use_mcp_server" => Self::UseMcpServer,
            "auto_approval_max_req_reached" => Self::AutoApprovalMaxReqReached,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for SayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SayKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SayKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::from(s.as_str()))
    }
}

impl Serialize for AskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::from(s.as_str()))
    }
}

/// Coarse kind of a message with its subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Narrative message.
    Say(SayKind),
    /// Decision point that may require input.
    Ask(AskKind),
}

/// One revision of a logical agent message.
///
/// Revisions of the same logical message share `ts`; the last revision has
/// `partial == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub struct AgentMessage {
    /// Identifier shared by all revisions of this message.
    pub ts: u64,
    /// Kind and subtype.
    pub kind: MessageKind,
    /// Text payload.
    pub text: Option<String>,
    /// Whether the message is still being produced.
    pub partial: bool,
}

impl AgentMessage {
    /// Create a final `say` message.
    pub fn say(ts: u64, kind: SayKind, text: impl Into<String>) -> Self {
        Self {
            ts,
            kind: MessageKind::Say(kind),
            text: Some(text.into()),
            partial: false,
        }
    }

    /// Create a final `ask` message.
    pub fn ask(ts: u64, kind: AskKind, text: impl Into<String>) -> Self {
        Self {
            ts,
            kind: MessageKind::Ask(kind),
            text: Some(text.into()),
            partial: false,
        }
    }

    /// Mark this revision as partial (or final).
    #[must_use]
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// Text payload, empty when absent.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// The ask subtype, if this is an ask.
    #[must_use]
    pub const fn ask_kind(&self) -> Option<&AskKind> {
        match &self.kind {
            MessageKind::Ask(kind) => Some(kind),
            MessageKind::Say(_) => None,
        }
    }

    /// The say subtype, if this is a say.
    #[must_use]
    pub const fn say_kind(&self) -> Option<&SayKind> {
        match &self.kind {
            MessageKind::Say(kind) => Some(kind),
            MessageKind::Ask(_) => None,
        }
    }
}

/// Message as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMessage {
    ts: u64,
    #[serde(rename = "type")]
    kind: RawKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    say: Option<SayKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ask: Option<AskKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    partial: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Say,
    Ask,
}

/// A raw message could not be turned into an [`AgentMessage`].
#[derive(Debug, thiserror::Error)]
#[error("{0} message has no `{0}` subtype")]
pub struct MissingSubtype(&'static str);

impl TryFrom<RawMessage> for AgentMessage {
    type Error = MissingSubtype;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let kind = match raw.kind {
            RawKind::Say => MessageKind::Say(raw.say.ok_or(MissingSubtype("say"))?),
            RawKind::Ask => MessageKind::Ask(raw.ask.ok_or(MissingSubtype("ask"))?),
        };

        Ok(Self {
            ts: raw.ts,
            kind,
            text: raw.text,
            partial: raw.partial,
        })
    }
}

impl From<AgentMessage> for RawMessage {
    fn from(message: AgentMessage) -> Self {
        let (kind, say, ask) = match message.kind {
            MessageKind::Say(say) => (RawKind::Say, Some(say), None),
            MessageKind::Ask(ask) => (RawKind::Ask, None, Some(ask)),
        };

        Self {
            ts: message.ts,
            kind,
            say,
            ask,
            text: message.text,
            partial: message.partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_partial_ask() {
        let message: AgentMessage = serde_json::from_str(
            r#"{"ts":101,"type":"ask","ask":"command","partial":true,"text":"gh"}"#,
        )
        .unwrap();

        assert_eq!(message.ts, 101);
        assert_eq!(message.kind, MessageKind::Ask(AskKind::Command));
        assert_eq!(message.text(), "gh");
        assert!(message.partial);
    }

    #[test]
    fn missing_partial_means_final() {
        let message: AgentMessage =
            serde_json::from_str(r#"{"ts":1,"type":"say","say":"text","text":"hi"}"#).unwrap();
        assert!(!message.partial);
    }

    #[test]
    fn unknown_subtype_is_preserved() {
        let message: AgentMessage =
            serde_json::from_str(r#"{"ts":1,"type":"say","say":"shiny_new_thing"}"#).unwrap();
        assert_eq!(
            message.kind,
            MessageKind::Say(SayKind::Unknown("shiny_new_thing".to_string()))
        );

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["say"], "shiny_new_thing");
    }

    #[test]
    fn ask_without_subtype_is_rejected() {
        let result = serde_json::from_str::<AgentMessage>(r#"{"ts":1,"type":"ask"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn text_defaults_to_empty() {
        let message = AgentMessage {
            ts: 1,
            kind: MessageKind::Ask(AskKind::CompletionResult),
            text: None,
            partial: false,
        };
        assert_eq!(message.text(), "");
    }
}
