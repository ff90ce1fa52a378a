//! Agent message model, state detection, and engine surface for Omni.

pub mod engine;
pub mod error;
pub mod state;
pub mod types;

pub use engine::{
    AskResponse, Engine, EngineEvent, EngineEventSender, EngineEvents, ExtensionMessage,
};
pub use error::{EngineError, Result};
pub use state::{
    AgentLoopState, AgentStateInfo, RequiredAction, TaskCompletedEvent, detect_agent_state,
    task_completed,
};
pub use types::{AgentMessage, AskKind, MessageKind, SayKind};
