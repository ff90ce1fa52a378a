//! Integration tests for single-task runs.

mod common;

use std::path::PathBuf;

use agent_core::{AgentMessage, AskKind, EngineEvent, ExtensionMessage, SayKind};
use serde_json::json;

use common::{Call, ScriptedEngine, lines, message};
use omni_stream::core::Error;
use omni_stream::core::runner::{Outcome, TaskRequest, execute};
use omni_stream::stream::{JsonEventEmitter, OutputFormat};

fn history_event() -> EngineEvent {
    EngineEvent::Extension(json!({
        "type": "state",
        "state": {
            "taskHistory": [
                { "id": "old", "ts": 10, "task": "first", "workspace": "/work/app" },
                { "id": "new", "ts": 30, "task": "second", "workspace": "/work/app" },
                { "id": "elsewhere", "ts": 50, "task": "third", "workspace": "/work/other" }
            ]
        }
    }))
}

#[tokio::test]
async fn prompt_runs_to_completion() {
    let (engine, mut events) = ScriptedEngine::new(vec![
        message(AgentMessage::say(1, SayKind::Text, "Working on it")),
        message(AgentMessage::ask(2, AskKind::CompletionResult, "Fixed")),
    ]);
    let mut emitter = JsonEventEmitter::new(OutputFormat::Json, Vec::new());

    let outcome = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Prompt("fix the bug".to_string()),
        false,
    )
    .await
    .unwrap();
    emitter.finish().unwrap();

    assert_eq!(outcome, Outcome::Completed { success: true });

    let output = lines(emitter.get_ref());
    assert_eq!(output.len(), 1);
    assert_eq!(output[0]["type"], "result");
    assert_eq!(output[0]["success"], true);
    assert_eq!(output[0]["content"], "Fixed");
    assert!(!output[0]["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn engine_error_fails_the_run() {
    let (engine, mut events) =
        ScriptedEngine::new(vec![EngineEvent::Error("host crashed".to_string())]);
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());

    let outcome = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Prompt("job".to_string()),
        false,
    )
    .await
    .unwrap();

    assert_eq!(outcome, Outcome::Failed("host crashed".to_string()));
}

#[tokio::test]
async fn api_failure_ends_the_run_only_with_exit_on_error() {
    let script = || {
        vec![
            message(AgentMessage::ask(1, AskKind::ApiReqFailed, "rate limited")),
            message(AgentMessage::ask(2, AskKind::CompletionResult, "done anyway")),
        ]
    };

    let (engine, mut events) = ScriptedEngine::new(script());
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());
    let outcome = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Prompt("job".to_string()),
        true,
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        Outcome::Failed("api request failed: rate limited".to_string())
    );

    let (engine, mut events) = ScriptedEngine::new(script());
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());
    let outcome = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Prompt("job".to_string()),
        false,
    )
    .await
    .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn continue_resumes_the_newest_workspace_task() {
    let (engine, mut events) = ScriptedEngine::new(vec![message(AgentMessage::ask(
        100,
        AskKind::ResumeCompletedTask,
        "",
    ))]);
    engine.emit(history_event());
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());

    let outcome = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Resume {
            session_id: None,
            workspace: PathBuf::from("/work/app/"),
        },
        false,
    )
    .await
    .unwrap();

    assert!(outcome.is_success());
    let output = lines(emitter.get_ref());
    assert_eq!(output.last().unwrap()["taskId"], "new");
    assert_eq!(
        engine.calls(),
        [
            Call::Send(ExtensionMessage::RequestState),
            Call::ResumeTask("new".to_string()),
        ]
    );
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let (engine, mut events) = ScriptedEngine::new(Vec::new());
    engine.emit(history_event());
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());

    let err = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Resume {
            session_id: Some("missing".to_string()),
            workspace: PathBuf::from("/work/app"),
        },
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::SessionNotFound(id) if id == "missing"));
    assert!(
        !engine
            .calls()
            .contains(&Call::ResumeTask("missing".to_string()))
    );
}

#[tokio::test]
async fn continue_without_history_reports_no_previous_task() {
    let (engine, mut events) = ScriptedEngine::new(Vec::new());
    let mut emitter = JsonEventEmitter::new(OutputFormat::StreamJson, Vec::new());

    let err = execute(
        engine.as_ref(),
        &mut events,
        &mut emitter,
        TaskRequest::Resume {
            session_id: None,
            workspace: PathBuf::from("/work/app"),
        },
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::NoPreviousTask));
}
