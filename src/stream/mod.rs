//! Streaming protocol: wire events, the delta emitter, and the stdin loop.

pub mod command;
pub mod emitter;
pub mod event;
pub mod stdin;
pub mod text;

use std::io;

use agent_core::{AgentMessage, TaskCompletedEvent};

pub use command::{CommandError, CommandName, InputCommand, parse_command};
pub use emitter::JsonEventEmitter;
pub use event::{
    ControlSubtype, Cost, EventType, FinalOutput, OutputFormat, QueueItem, StreamEvent, ToolResult,
    ToolUse,
};
pub use stdin::{STDIN_CAPABILITIES, SessionEnd, SessionState, StdinSession, queue_snapshot};
pub use text::TextOutput;

/// Destination for the output of a single task run.
pub trait OutputSink {
    /// A message revision arrived.
    fn on_message(&mut self, message: &AgentMessage) -> io::Result<()>;

    /// The task completed.
    fn on_task_completed(&mut self, completed: &TaskCompletedEvent) -> io::Result<()>;

    /// The task failed with an engine or runtime error.
    fn on_failure(&mut self, message: &str) -> io::Result<()>;

    /// The engine's message queue changed.
    fn on_queue(&mut self, items: Vec<QueueItem>) -> io::Result<()>;

    /// Events from now on belong to `task_id`.
    fn set_task(&mut self, _task_id: &str) {}

    /// Flush everything; called once before exit.
    fn finish(&mut self) -> io::Result<()>;
}
