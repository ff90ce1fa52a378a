//! Agent client state tracking.

use agent_core::{
    AgentMessage, AgentStateInfo, TaskCompletedEvent, detect_agent_state, task_completed,
};

/// Tracks the message history of the current task and derives completion
/// notifications from it.
#[derive(Debug)]
pub struct AgentClient {
    messages: Vec<AgentMessage>,
    state: AgentStateInfo,
    /// Timestamp of the message whose completion was last reported.
    completed_ts: Option<u64>,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            state: AgentStateInfo::ready(),
            completed_ts: None,
        }
    }

    /// Forget the history of the previous task.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.state = AgentStateInfo::ready();
        self.completed_ts = None;
    }

    #[must_use]
    pub const fn state(&self) -> &AgentStateInfo {
        &self.state
    }

    #[must_use]
    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    /// Record one message revision.
    ///
    /// Returns a completion notification when this revision moves the agent
    /// into a completed state. A completion message fires at most once even
    /// if later revisions of it arrive.
    pub fn handle_message(&mut self, message: AgentMessage) -> Option<TaskCompletedEvent> {
        match self.messages.iter().rposition(|m| m.ts == message.ts) {
            Some(index) => self.messages[index] = message,
            None => self.messages.push(message),
        }

        let previous = std::mem::replace(&mut self.state, detect_agent_state(&self.messages));
        if !task_completed(&previous, &self.state) {
            return None;
        }

        let ts = self.state.last_message_ts;
        if ts.is_some() && ts == self.completed_ts {
            return None;
        }
        self.completed_ts = ts;

        tracing::debug!(ts = ?ts, "task completed");

        Some(TaskCompletedEvent {
            success: true,
            state_info: self.state.clone(),
            message: self.state.last_message.clone(),
        })
    }
}
