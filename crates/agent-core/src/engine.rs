//! Engine control surface.
//!
//! The engine runs tasks and produces the message feed. It is an external
//! collaborator: the protocol layer only calls the operations below and reads
//! [`EngineEvent`]s from the channel the engine was created with.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::AgentMessage;

/// Event produced by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A new revision of an agent message.
    Message(AgentMessage),
    /// The engine failed while executing a task.
    Error(String),
    /// Any other message the engine broadcasts (state snapshots, history).
    Extension(Value),
}

/// Receiving half of an engine's event channel.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Sending half of an engine's event channel.
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Message forwarded to the engine outside of the task calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    /// Abort the current task.
    CancelTask,
    /// Queue a user message into the running task.
    QueueMessage { text: String },
    /// Answer the pending ask with text.
    AskResponse {
        #[serde(rename = "askResponse")]
        response: AskResponse,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Ask the engine to broadcast its current state.
    RequestState,
    /// Ask the engine for its slash commands.
    RequestCommands,
    /// Ask the engine for its modes.
    RequestModes,
}

/// Kind of answer given to a pending ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AskResponse {
    /// Approve the pending action.
    YesButtonClicked,
    /// Reject the pending action.
    NoButtonClicked,
    /// Reply with a message.
    MessageResponse,
}

/// Trait for agent engines.
///
/// Only the top-level driver and the stdin loop call these methods; the
/// message feed is consumed separately through [`EngineEvents`].
#[async_trait]
pub trait Engine: Send + Sync {
    /// Get the engine name.
    fn name(&self) -> &'static str;

    /// Bring the engine up. Must be called once before any other operation.
    async fn activate(&self) -> Result<()>;

    /// Start a new task.
    ///
    /// Returns once the task has been accepted; progress and completion are
    /// reported through the event channel.
    async fn run_task(&self, prompt: &str, configuration: Option<Value>) -> Result<()>;

    /// Reopen a task from history.
    async fn resume_task(&self, session_id: &str) -> Result<()>;

    /// Forward a message to the engine.
    async fn send_to_extension(&self, message: ExtensionMessage) -> Result<()>;

    /// Release all engine resources. Safe to call more than once.
    async fn dispose(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_messages_use_type_tag() {
        let json = serde_json::to_value(ExtensionMessage::CancelTask).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "cancelTask" }));

        let json = serde_json::to_value(ExtensionMessage::QueueMessage {
            text: "more".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "queueMessage", "text": "more" }));
    }

    #[test]
    fn ask_response_serializes_camel_case() {
        let json = serde_json::to_value(ExtensionMessage::AskResponse {
            response: AskResponse::MessageResponse,
            text: Some("go on".to_string()),
        })
        .unwrap();
        assert_eq!(json["type"], "askResponse");
        assert_eq!(json["askResponse"], "messageResponse");
        assert_eq!(json["text"], "go on");
    }
}
