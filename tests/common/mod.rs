//! Scripted in-memory engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_core::{
    AgentMessage, Engine, EngineError, EngineEvent, EngineEventSender, EngineEvents,
    ExtensionMessage,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// A call the engine received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Activate,
    RunTask(String),
    ResumeTask(String),
    Send(ExtensionMessage),
    Dispose,
}

/// Engine that records calls and replays a script each time a task starts.
pub struct ScriptedEngine {
    events: EngineEventSender,
    calls: Mutex<Vec<Call>>,
    scripts: Mutex<VecDeque<Vec<EngineEvent>>>,
    run_error: Option<String>,
}

impl ScriptedEngine {
    /// Replays `on_start` for the first task only.
    pub fn new(on_start: Vec<EngineEvent>) -> (Arc<Self>, EngineEvents) {
        Self::build(vec![on_start], None)
    }

    /// Replays one script per started task, in order.
    pub fn per_task(scripts: Vec<Vec<EngineEvent>>) -> (Arc<Self>, EngineEvents) {
        Self::build(scripts, None)
    }

    /// An engine whose `run_task` always fails.
    pub fn failing(error: &str) -> (Arc<Self>, EngineEvents) {
        Self::build(Vec::new(), Some(error.to_string()))
    }

    fn build(
        scripts: Vec<Vec<EngineEvent>>,
        run_error: Option<String>,
    ) -> (Arc<Self>, EngineEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            events: tx,
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(scripts.into()),
            run_error,
        });
        (engine, rx)
    }

    /// Push an event as if the engine produced it.
    pub fn emit(&self, event: EngineEvent) {
        self.events.send(event).unwrap();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn replay(&self) {
        let script = self.scripts.lock().unwrap().pop_front();
        for event in script.into_iter().flatten() {
            self.emit(event);
        }
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn activate(&self) -> agent_core::Result<()> {
        self.record(Call::Activate);
        Ok(())
    }

    async fn run_task(&self, prompt: &str, _configuration: Option<Value>) -> agent_core::Result<()> {
        self.record(Call::RunTask(prompt.to_string()));
        if let Some(error) = &self.run_error {
            return Err(EngineError::Failed(error.clone()));
        }
        self.replay();
        Ok(())
    }

    async fn resume_task(&self, session_id: &str) -> agent_core::Result<()> {
        self.record(Call::ResumeTask(session_id.to_string()));
        self.replay();
        Ok(())
    }

    async fn send_to_extension(&self, message: ExtensionMessage) -> agent_core::Result<()> {
        self.record(Call::Send(message));
        Ok(())
    }

    async fn dispose(&self) -> agent_core::Result<()> {
        self.record(Call::Dispose);
        Ok(())
    }
}

pub fn message(message: AgentMessage) -> EngineEvent {
    EngineEvent::Message(message)
}

/// Parse NDJSON output into values.
pub fn lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// `(subtype, requestId, code)` of every control event, in order.
pub fn controls(events: &[Value]) -> Vec<(String, Option<String>, String)> {
    events
        .iter()
        .filter(|event| event["type"] == "control")
        .map(|event| {
            (
                event["subtype"].as_str().unwrap().to_string(),
                event["requestId"].as_str().map(str::to_string),
                event["code"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}
