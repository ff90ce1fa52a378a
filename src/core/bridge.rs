//! Engine host bridge.
//!
//! Runs the engine host as a child process and talks NDJSON with it: one
//! request per line on its stdin, one event per line on its stdout. Host
//! stderr is forwarded to the log.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_core::{
    AgentMessage, Engine, EngineError, EngineEvent, EngineEventSender, ExtensionMessage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

/// How long the host gets to exit after `dispose` before it is killed.
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Options sent to the host on activation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOptions {
    pub workspace_path: PathBuf,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_mistake_limit: Option<u32>,
    pub non_interactive: bool,
    pub exit_on_error: bool,
    pub exit_on_complete: bool,
    pub ephemeral: bool,
    pub debug: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum HostRequest<'a> {
    Activate {
        options: &'a HostOptions,
    },
    RunTask {
        prompt: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        configuration: Option<Value>,
    },
    ResumeTask {
        #[serde(rename = "sessionId")]
        session_id: &'a str,
    },
    Webview {
        message: &'a ExtensionMessage,
    },
    Dispose,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum HostEvent {
    Message { message: AgentMessage },
    Error { message: String },
    Extension { message: Value },
}

impl From<HostEvent> for EngineEvent {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::Message { message } => Self::Message(message),
            HostEvent::Error { message } => Self::Error(message),
            HostEvent::Extension { message } => Self::Extension(message),
        }
    }
}

struct HostProcess {
    child: Child,
    stdin: ChildStdin,
}

/// [`Engine`] backed by an engine host child process.
pub struct BridgeEngine {
    command: Vec<String>,
    options: HostOptions,
    events: EngineEventSender,
    process: Mutex<Option<HostProcess>>,
    disposed: Arc<AtomicBool>,
}

impl BridgeEngine {
    /// Create a bridge that will run `command` on activation.
    ///
    /// Events read from the host are sent on `events`.
    #[must_use]
    pub fn new(command: Vec<String>, options: HostOptions, events: EngineEventSender) -> Self {
        Self {
            command,
            options,
            events,
            process: Mutex::new(None),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn send(&self, request: &HostRequest<'_>) -> agent_core::Result<()> {
        let mut guard = self.process.lock().await;
        let Some(process) = guard.as_mut() else {
            return Err(if self.disposed.load(Ordering::SeqCst) {
                EngineError::Disposed
            } else {
                EngineError::NotActivated
            });
        };

        let mut line =
            serde_json::to_string(request).map_err(|e| EngineError::Parse(e.to_string()))?;
        line.push('\n');
        process.stdin.write_all(line.as_bytes()).await?;
        process.stdin.flush().await?;
        Ok(())
    }

    fn spawn(&self) -> agent_core::Result<HostProcess> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EngineError::Failed("no engine host command configured".to_string()))?;

        tracing::info!(cmd = %program, "starting engine host");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.options.workspace_path.as_os_str().is_empty() {
            command.current_dir(&self.options.workspace_path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Failed(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Transport("host stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Transport("host stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "engine_host", "{line}");
                }
            });
        }

        let events = self.events.clone();
        let disposed = Arc::clone(&self.disposed);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match serde_json::from_str::<HostEvent>(&line) {
                        Ok(event) => {
                            if events.send(event.into()).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "skipping host line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read from engine host");
                        break;
                    }
                }
            }

            if !disposed.load(Ordering::SeqCst) {
                let _ = events.send(EngineEvent::Error("engine host exited".to_string()));
            }
        });

        Ok(HostProcess { child, stdin })
    }
}

#[async_trait]
impl Engine for BridgeEngine {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn activate(&self) -> agent_core::Result<()> {
        {
            let mut guard = self.process.lock().await;
            if guard.is_some() {
                return Ok(());
            }
            if self.disposed.load(Ordering::SeqCst) {
                return Err(EngineError::Disposed);
            }
            *guard = Some(self.spawn()?);
        }

        self.send(&HostRequest::Activate {
            options: &self.options,
        })
        .await
    }

    async fn run_task(&self, prompt: &str, configuration: Option<Value>) -> agent_core::Result<()> {
        tracing::debug!(len = prompt.len(), "run task");
        self.send(&HostRequest::RunTask {
            prompt,
            configuration,
        })
        .await
    }

    async fn resume_task(&self, session_id: &str) -> agent_core::Result<()> {
        tracing::debug!(session_id, "resume task");
        self.send(&HostRequest::ResumeTask { session_id }).await
    }

    async fn send_to_extension(&self, message: ExtensionMessage) -> agent_core::Result<()> {
        self.send(&HostRequest::Webview { message: &message }).await
    }

    async fn dispose(&self) -> agent_core::Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };

        let line = serde_json::to_string(&HostRequest::Dispose)
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        if let Err(e) = process.stdin.write_all(format!("{line}\n").as_bytes()).await {
            tracing::debug!(error = %e, "engine host already gone");
        }
        drop(process.stdin);

        match tokio::time::timeout(DISPOSE_TIMEOUT, process.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "engine host exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for engine host"),
            Err(_) => {
                tracing::warn!("engine host did not exit, killing it");
                process.child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn requests_use_host_wire_names() {
        let resume = serde_json::to_value(HostRequest::ResumeTask { session_id: "t1" }).unwrap();
        assert_eq!(resume, json!({ "type": "resumeTask", "sessionId": "t1" }));

        let run = serde_json::to_value(HostRequest::RunTask {
            prompt: "hi",
            configuration: None,
        })
        .unwrap();
        assert_eq!(run, json!({ "type": "runTask", "prompt": "hi" }));

        let webview = serde_json::to_value(HostRequest::Webview {
            message: &ExtensionMessage::CancelTask,
        })
        .unwrap();
        assert_eq!(webview["message"]["type"], "cancelTask");
    }

    #[test]
    fn host_events_decode() {
        let event: HostEvent = serde_json::from_str(
            r#"{"type":"message","message":{"ts":1,"type":"say","say":"text","text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(EngineEvent::from(event), EngineEvent::Message(m) if m.text() == "hi"));

        let event: HostEvent =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert!(matches!(EngineEvent::from(event), EngineEvent::Error(e) if e == "boom"));
    }

    #[test]
    fn activation_options_are_camel_case() {
        let options = HostOptions {
            mode: "code".to_string(),
            non_interactive: true,
            ..HostOptions::default()
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["nonInteractive"], true);
        assert!(json.get("model").is_none());
    }

    #[tokio::test]
    async fn calls_before_activation_fail() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = BridgeEngine::new(vec!["true".to_string()], HostOptions::default(), tx);

        let err = engine.run_task("hi", None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotActivated));

        engine.dispose().await.unwrap();
        let err = engine.run_task("hi", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Disposed));
    }

    #[tokio::test]
    async fn empty_command_fails_activation() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = BridgeEngine::new(Vec::new(), HostOptions::default(), tx);
        assert!(matches!(
            engine.activate().await,
            Err(EngineError::Failed(_))
        ));
    }
}
