//! Emitter behavior driven through the client, as the runner drives it.

mod common;

use agent_core::{AgentMessage, AskKind, SayKind};
use serde_json::Value;

use common::lines;
use omni_stream::core::client::AgentClient;
use omni_stream::stream::{JsonEventEmitter, OutputFormat};

/// Feed revisions the way the runner does and return the written events.
fn drive(messages: Vec<AgentMessage>) -> Vec<Value> {
    let mut client = AgentClient::new();
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());

    for message in messages {
        emitter.handle_message(&message).unwrap();
        if let Some(completed) = client.handle_message(message) {
            emitter.handle_task_completed(&completed).unwrap();
        }
    }
    lines(&emitter.into_inner())
}

fn results(events: &[Value]) -> Vec<&Value> {
    events
        .iter()
        .filter(|event| event["type"] == "result")
        .collect()
}

#[test]
fn cached_completion_text_does_not_leak_into_next_result() {
    let events = drive(vec![
        AgentMessage::say(1, SayKind::CompletionResult, "FIRST"),
        AgentMessage::ask(2, AskKind::CompletionResult, ""),
        AgentMessage::say(3, SayKind::Text, "next task"),
        AgentMessage::ask(4, AskKind::CompletionResult, ""),
    ]);

    let results = results(&events);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["content"], "FIRST");
    assert!(results[1].get("content").is_none());
}

#[test]
fn each_completion_reports_its_own_text() {
    let events = drive(vec![
        AgentMessage::ask(1, AskKind::CompletionResult, "FIRST"),
        AgentMessage::say(2, SayKind::Text, "more work"),
        AgentMessage::ask(3, AskKind::CompletionResult, "SECOND"),
    ]);

    let contents: Vec<_> = results(&events)
        .iter()
        .map(|event| event["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["FIRST", "SECOND"]);
}

#[test]
fn command_deltas_are_suffixes() {
    let events = drive(vec![
        AgentMessage::ask(1, AskKind::Command, "g").with_partial(true),
        AgentMessage::ask(1, AskKind::Command, "gh").with_partial(true),
        AgentMessage::ask(1, AskKind::Command, "gh").with_partial(true),
        AgentMessage::ask(1, AskKind::Command, "gh pr"),
    ]);

    let tool_uses: Vec<_> = events
        .iter()
        .filter(|event| event["type"] == "tool_use")
        .collect();
    assert_eq!(tool_uses.len(), 3);
    assert_eq!(tool_uses[0]["tool_use"]["input"]["command"], "g");
    assert_eq!(tool_uses[1]["tool_use"]["input"]["command"], "h");

    let last = tool_uses[2];
    assert_eq!(last["done"], true);
    assert!(last.get("content").is_none());
    assert_eq!(last["tool_use"]["input"]["command"], "gh pr");
}

#[test]
fn failed_api_request_is_not_a_completion() {
    let events = drive(vec![
        AgentMessage::say(1, SayKind::Text, "trying"),
        AgentMessage::ask(2, AskKind::ApiReqFailed, "rate limited"),
    ]);
    assert!(results(&events).is_empty());
}
