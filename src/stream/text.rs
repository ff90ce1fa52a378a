//! Plain text output.

use std::io::{self, Write};

use agent_core::{AgentMessage, AskKind, MessageKind, SayKind, TaskCompletedEvent};
use serde_json::Value;

use super::OutputSink;
use super::event::QueueItem;

/// Prints final assistant text and the task result to `out`, and short
/// diagnostics prefixed with `[cli]` to `err`.
pub struct TextOutput<W: Write, E: Write> {
    out: W,
    err: E,
    pending_completion: Option<String>,
}

impl<W: Write, E: Write> TextOutput<W, E> {
    #[must_use]
    pub const fn new(out: W, err: E) -> Self {
        Self {
            out,
            err,
            pending_completion: None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (W, E) {
        (self.out, self.err)
    }

    fn diagnostic(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.err, "[cli] {line}")
    }
}

impl<W: Write, E: Write> OutputSink for TextOutput<W, E> {
    fn on_message(&mut self, message: &AgentMessage) -> io::Result<()> {
        if message.partial {
            return Ok(());
        }
        let text = message.text();

        match &message.kind {
            MessageKind::Say(SayKind::Text) | MessageKind::Ask(AskKind::Followup) => {
                if !text.trim().is_empty() {
                    writeln!(self.out, "{text}")?;
                }
            }
            MessageKind::Say(SayKind::CompletionResult) => {
                if !text.trim().is_empty() {
                    self.pending_completion = Some(text.to_string());
                }
            }
            MessageKind::Say(SayKind::Error) => self.diagnostic(&format!("error: {text}"))?,
            MessageKind::Ask(AskKind::Command) => self.diagnostic(&format!("command: {text}"))?,
            MessageKind::Ask(AskKind::Tool) => {
                let name = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("tool").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                self.diagnostic(&format!("tool: {name}"))?;
            }
            MessageKind::Ask(AskKind::ApiReqFailed) => {
                self.diagnostic(&format!("api request failed: {text}"))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn on_task_completed(&mut self, completed: &TaskCompletedEvent) -> io::Result<()> {
        let pending = self.pending_completion.take();
        let content = completed
            .message
            .as_ref()
            .map(AgentMessage::text)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .or(pending);

        if let Some(content) = content {
            writeln!(self.out, "{content}")?;
        }
        if !completed.success {
            self.diagnostic("task failed")?;
        }
        Ok(())
    }

    fn on_failure(&mut self, message: &str) -> io::Result<()> {
        self.pending_completion = None;
        self.diagnostic(&format!("task failed: {message}"))
    }

    fn on_queue(&mut self, _items: Vec<QueueItem>) -> io::Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.err.flush()
    }
}

#[cfg(test)]
mod tests {
    use agent_core::detect_agent_state;

    use super::*;

    #[test]
    fn prints_final_text_and_result() {
        let mut output = TextOutput::new(Vec::new(), Vec::new());
        output
            .on_message(&AgentMessage::say(1, SayKind::Text, "Hel").with_partial(true))
            .unwrap();
        output
            .on_message(&AgentMessage::say(1, SayKind::Text, "Hello"))
            .unwrap();
        output
            .on_message(&AgentMessage::say(2, SayKind::CompletionResult, "All done"))
            .unwrap();

        let message = AgentMessage::ask(3, AskKind::CompletionResult, "");
        output
            .on_task_completed(&TaskCompletedEvent {
                success: true,
                state_info: detect_agent_state(std::slice::from_ref(&message)),
                message: Some(message),
            })
            .unwrap();

        let (out, err) = output.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\nAll done\n");
        assert!(err.is_empty());
    }

    #[test]
    fn diagnostics_go_to_stderr() {
        let mut output = TextOutput::new(Vec::new(), Vec::new());
        output
            .on_message(&AgentMessage::ask(1, AskKind::Command, "cargo fmt"))
            .unwrap();
        output.on_failure("engine crashed").unwrap();

        let (out, err) = output.into_parts();
        assert!(out.is_empty());
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "[cli] command: cargo fmt\n[cli] task failed: engine crashed\n"
        );
    }
}
