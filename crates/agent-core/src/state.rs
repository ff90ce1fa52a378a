//! Agent state detection.
//!
//! The state is a pure projection of the message history. Only arrival order
//! is consulted; message timestamps are identifiers, never compared.

use serde::Serialize;

use crate::types::{AgentMessage, AskKind, MessageKind};

/// Coarse loop state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLoopState {
    /// The agent is producing output or executing work.
    Running,
    /// The agent has nothing in flight.
    Idle,
}

/// What the caller has to do for the agent to make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Nothing; the agent is working or no task exists.
    None,
    /// The task is finished; start a new one.
    StartTask,
    /// Answer a question.
    Answer,
    /// Approve or reject a pending action.
    Approve,
    /// Retry the failed request or start over.
    RetryOrNewTask,
    /// Give guidance after repeated mistakes.
    ProvideGuidance,
    /// Resume the interrupted task.
    ResumeTask,
}

/// Derived view of the agent at one point of its message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateInfo {
    pub state: AgentLoopState,
    pub is_waiting_for_input: bool,
    pub is_running: bool,
    pub is_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ask: Option<AskKind>,
    pub required_action: RequiredAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_ts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<AgentMessage>,
    pub description: String,
}

impl AgentStateInfo {
    fn running(last: &AgentMessage, streaming: bool, description: &str) -> Self {
        Self {
            state: AgentLoopState::Running,
            is_waiting_for_input: false,
            is_running: true,
            is_streaming: streaming,
            current_ask: None,
            required_action: RequiredAction::None,
            last_message_ts: Some(last.ts),
            last_message: Some(last.clone()),
            description: description.to_string(),
        }
    }

    fn waiting(last: &AgentMessage, ask: &AskKind) -> Self {
        let (required_action, description) = describe_ask(ask);
        Self {
            state: AgentLoopState::Idle,
            is_waiting_for_input: true,
            is_running: false,
            is_streaming: false,
            current_ask: Some(ask.clone()),
            required_action,
            last_message_ts: Some(last.ts),
            last_message: Some(last.clone()),
            description: description.to_string(),
        }
    }

    /// State of an agent that has not produced any message.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            state: AgentLoopState::Idle,
            is_waiting_for_input: false,
            is_running: false,
            is_streaming: false,
            current_ask: None,
            required_action: RequiredAction::None,
            last_message_ts: None,
            last_message: None,
            description: "Ready to start a task.".to_string(),
        }
    }
}

/// Notification that a task completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCompletedEvent {
    /// Whether the task ended successfully.
    pub success: bool,
    /// State at the moment of completion.
    pub state_info: AgentStateInfo,
    /// Message that triggered the completion.
    pub message: Option<AgentMessage>,
}

fn describe_ask(ask: &AskKind) -> (RequiredAction, &'static str) {
    match ask {
        AskKind::CompletionResult => (
            RequiredAction::StartTask,
            "Task completed successfully. You can provide feedback or start a new task.",
        ),
        AskKind::ResumeCompletedTask => (
            RequiredAction::StartTask,
            "Completed task reopened. You can provide feedback or start a new task.",
        ),
        AskKind::Followup => (
            RequiredAction::Answer,
            "The agent asked a question and is waiting for an answer.",
        ),
        AskKind::Command => (
            RequiredAction::Approve,
            "The agent wants to run a command.",
        ),
        AskKind::Tool => (RequiredAction::Approve, "The agent wants to use a tool."),
        AskKind::BrowserActionLaunch => (
            RequiredAction::Approve,
            "The agent wants to launch a browser.",
        ),
        AskKind::UseMcpServer => (
            RequiredAction::Approve,
            "The agent wants to use an MCP server.",
        ),
        AskKind::AutoApprovalMaxReqReached => (
            RequiredAction::Approve,
            "Auto-approval limit reached. Approve to continue.",
        ),
        AskKind::ApiReqFailed => (
            RequiredAction::RetryOrNewTask,
            "The API request failed. Retry or start a new task.",
        ),
        AskKind::MistakeLimitReached => (
            RequiredAction::ProvideGuidance,
            "The agent is stuck and needs guidance.",
        ),
        AskKind::ResumeTask => (
            RequiredAction::ResumeTask,
            "An interrupted task can be resumed.",
        ),
        // command_output never reaches here; it keeps the agent running
        AskKind::CommandOutput | AskKind::Unknown(_) => (
            RequiredAction::Answer,
            "The agent is waiting for input.",
        ),
    }
}

/// Classify the current state from the ordered message history.
///
/// Only the last element is inspected. A history containing several revisions
/// of one message yields the same result as one containing only its latest
/// revision, so callers may pass either the full history or a snapshot.
///
/// A final `say` is RUNNING: the engine never reports idle on its own, so the
/// only idle states are the asks that wait on the caller.
#[must_use]
pub fn detect_agent_state(messages: &[AgentMessage]) -> AgentStateInfo {
    let Some(last) = messages.last() else {
        return AgentStateInfo::ready();
    };

    if last.partial {
        return AgentStateInfo::running(last, true, "The agent is streaming a response.");
    }

    match &last.kind {
        MessageKind::Ask(AskKind::CommandOutput) => {
            AgentStateInfo::running(last, false, "A command is running.")
        }
        MessageKind::Ask(ask) => AgentStateInfo::waiting(last, ask),
        MessageKind::Say(_) => AgentStateInfo::running(last, false, "The agent is working."),
    }
}

/// Whether the transition into `current` completes a task.
///
/// Only `completion_result` and `resume_completed_task` count. Recoverable
/// idle asks such as `mistake_limit_reached` or `api_req_failed` pause the
/// task without completing it.
#[must_use]
pub fn task_completed(_previous: &AgentStateInfo, current: &AgentStateInfo) -> bool {
    matches!(
        current.current_ask,
        Some(AskKind::CompletionResult | AskKind::ResumeCompletedTask)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SayKind;

    fn working() -> AgentStateInfo {
        detect_agent_state(&[AgentMessage::say(1, SayKind::Text, "working")])
    }

    #[test]
    fn empty_history_is_ready() {
        let info = detect_agent_state(&[]);
        assert_eq!(info.state, AgentLoopState::Idle);
        assert!(!info.is_waiting_for_input);
        assert!(info.current_ask.is_none());
        assert_eq!(info.description, "Ready to start a task.");
    }

    #[test]
    fn partial_message_is_streaming_regardless_of_subtype() {
        let info = detect_agent_state(&[
            AgentMessage::ask(5, AskKind::CompletionResult, "").with_partial(true)
        ]);
        assert_eq!(info.state, AgentLoopState::Running);
        assert!(info.is_streaming);
        assert!(info.current_ask.is_none());
    }

    #[test]
    fn say_keeps_agent_running() {
        let info = working();
        assert_eq!(info.state, AgentLoopState::Running);
        assert!(info.is_running);
        assert!(!info.is_streaming);
        assert_eq!(info.last_message_ts, Some(1));
    }

    #[test]
    fn completion_ask_requires_new_task() {
        let info = detect_agent_state(&[AgentMessage::ask(2, AskKind::CompletionResult, "")]);
        assert_eq!(info.state, AgentLoopState::Idle);
        assert!(info.is_waiting_for_input);
        assert_eq!(info.current_ask, Some(AskKind::CompletionResult));
        assert_eq!(info.required_action, RequiredAction::StartTask);
    }

    #[test]
    fn tool_and_command_asks_require_approval() {
        for ask in [AskKind::Tool, AskKind::Command] {
            let info = detect_agent_state(&[AgentMessage::ask(3, ask.clone(), "{}")]);
            assert_eq!(info.required_action, RequiredAction::Approve, "{ask}");
            assert!(info.is_waiting_for_input);
        }
    }

    #[test]
    fn command_output_ask_is_running() {
        let info = detect_agent_state(&[AgentMessage::ask(3, AskKind::CommandOutput, "")]);
        assert_eq!(info.state, AgentLoopState::Running);
        assert!(!info.is_waiting_for_input);
    }

    #[test]
    fn full_history_and_latest_snapshot_agree() {
        let history = vec![
            AgentMessage::say(1, SayKind::Text, "hi"),
            AgentMessage::ask(2, AskKind::Followup, "?").with_partial(true),
            AgentMessage::ask(2, AskKind::Followup, "??"),
        ];
        let full = detect_agent_state(&history);
        let snapshot = detect_agent_state(&history[2..]);
        assert_eq!(full, snapshot);
        assert_eq!(full.required_action, RequiredAction::Answer);
    }

    #[test]
    fn task_completed_for_completion_result() {
        let current = detect_agent_state(&[AgentMessage::ask(2, AskKind::CompletionResult, "")]);
        assert!(task_completed(&working(), &current));
    }

    #[test]
    fn task_completed_for_resume_completed_task() {
        let current =
            detect_agent_state(&[AgentMessage::ask(2, AskKind::ResumeCompletedTask, "")]);
        assert!(task_completed(&working(), &current));
    }

    #[test]
    fn recoverable_idle_asks_do_not_complete() {
        let mistake = detect_agent_state(&[AgentMessage::ask(2, AskKind::MistakeLimitReached, "")]);
        let failed = detect_agent_state(&[AgentMessage::ask(3, AskKind::ApiReqFailed, "")]);

        assert!(!task_completed(&working(), &mistake));
        assert!(!task_completed(&working(), &failed));
        assert_eq!(mistake.required_action, RequiredAction::ProvideGuidance);
        assert_eq!(failed.required_action, RequiredAction::RetryOrNewTask);
    }

    #[test]
    fn task_completed_ignores_previous_state() {
        let done = detect_agent_state(&[AgentMessage::ask(2, AskKind::CompletionResult, "")]);
        assert!(task_completed(&done, &done));
        assert!(!task_completed(&done, &working()));
    }
}
