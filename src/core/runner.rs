//! Top-level driver.
//!
//! Builds the engine from the command line and configuration, runs one task
//! (or the stdin command loop), and maps the result to a process exit code.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{AskKind, Engine, EngineEvent, EngineEvents, ExtensionMessage, MessageKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;

use super::bridge::{BridgeEngine, HostOptions};
use super::client::AgentClient;
use super::error::{Error, Result};
use super::history::{self, HistoryItem};
use crate::cli::Cli;
use crate::config::{AgentSettings, Config, EffectiveSettings};
use crate::stream::{
    EventType, JsonEventEmitter, OutputFormat, OutputSink, SessionEnd, StdinSession, StreamEvent,
    TextOutput, queue_snapshot,
};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SIGINT: u8 = 130;
pub const EXIT_SIGTERM: u8 = 143;

/// Keep-alive tick while parked by `--signal-only-exit`.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// How long a resume waits for the engine's task history.
const HISTORY_WAIT: Duration = Duration::from_secs(2);

const CHANNEL_CLOSED: &str = "engine event channel closed";

/// What a single run should do once the engine is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    /// Start a new task.
    Prompt(String),
    /// Reopen a task; `None` picks the newest task of `workspace`.
    Resume {
        session_id: Option<String>,
        workspace: PathBuf,
    },
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The task reached a completion.
    Completed { success: bool },
    /// The engine failed, or an API failure ended the run.
    Failed(String),
}

impl Outcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { success: true })
    }
}

/// Event handling for one task.
struct TaskRun<'a> {
    client: AgentClient,
    sink: &'a mut dyn OutputSink,
    exit_on_error: bool,
    history: Option<Vec<HistoryItem>>,
}

impl TaskRun<'_> {
    fn handle(&mut self, event: EngineEvent) -> Result<Option<Outcome>> {
        match event {
            EngineEvent::Message(message) => {
                self.sink.on_message(&message)?;

                if self.exit_on_error
                    && !message.partial
                    && message.kind == MessageKind::Ask(AskKind::ApiReqFailed)
                {
                    let text = message.text();
                    let reason = if text.is_empty() {
                        "api request failed".to_string()
                    } else {
                        format!("api request failed: {text}")
                    };
                    return Ok(Some(Outcome::Failed(reason)));
                }

                if let Some(completed) = self.client.handle_message(message) {
                    self.sink.on_task_completed(&completed)?;
                    return Ok(Some(Outcome::Completed {
                        success: completed.success,
                    }));
                }
            }
            EngineEvent::Error(message) => return Ok(Some(Outcome::Failed(message))),
            EngineEvent::Extension(message) => {
                if let Some(history) = history::extract_task_history(&message) {
                    tracing::debug!(tasks = history.len(), "task history snapshot");
                    self.history = Some(history);
                }
                if let Some(items) = queue_snapshot(&message) {
                    self.sink.on_queue(items)?;
                }
            }
        }
        Ok(None)
    }
}

/// Run one task on an activated engine and pump its events to `sink`.
///
/// Returns once the task completes or fails. The sink is not finished.
pub async fn execute(
    engine: &dyn Engine,
    events: &mut EngineEvents,
    sink: &mut dyn OutputSink,
    request: TaskRequest,
    exit_on_error: bool,
) -> Result<Outcome> {
    let mut run = TaskRun {
        client: AgentClient::new(),
        sink,
        exit_on_error,
        history: None,
    };

    match request {
        TaskRequest::Prompt(prompt) => {
            tracing::info!(len = prompt.len(), "starting task");
            engine.run_task(&prompt, None).await?;
        }
        TaskRequest::Resume {
            session_id,
            workspace,
        } => {
            engine
                .send_to_extension(ExtensionMessage::RequestState)
                .await?;

            let deadline = tokio::time::Instant::now() + HISTORY_WAIT;
            while run.history.is_none() {
                match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(Some(event)) => {
                        if let Some(outcome) = run.handle(event)? {
                            return Ok(outcome);
                        }
                    }
                    Ok(None) => return Ok(Outcome::Failed(CHANNEL_CLOSED.to_string())),
                    Err(_) => {
                        tracing::debug!("no task history received");
                        break;
                    }
                }
            }

            // an empty snapshot cannot confirm or refute an explicit id
            let snapshot = run.history.as_deref().filter(|h| !h.is_empty());
            let session_id =
                history::resolve_resume_session(snapshot, &workspace, session_id.as_deref())?;
            tracing::info!(session_id = %session_id, "resuming task");
            run.sink.set_task(&session_id);
            engine.resume_task(&session_id).await?;
        }
    }

    loop {
        let Some(event) = events.recv().await else {
            return Ok(Outcome::Failed(CHANNEL_CLOSED.to_string()));
        };
        if let Some(outcome) = run.handle(event)? {
            return Ok(outcome);
        }
    }
}

/// Merge command line flags over the configuration file.
pub fn effective_settings(cli: &Cli, config: &Config) -> Result<EffectiveSettings> {
    let mut settings = config.agent.clone();
    settings.merge(AgentSettings {
        mode: cli.mode.clone(),
        model: cli.model.clone(),
        reasoning_effort: cli.reasoning_effort.clone(),
        provider: cli.provider.clone(),
        oneshot: cli.oneshot.then_some(true),
        require_approval: cli.require_approval.then_some(true),
    });
    settings.resolve().map_err(|e| Error::Config(e.to_string()))
}

/// Engine host command from `--extension`, else from the configuration.
pub fn engine_command(extension: Option<&str>, config: &Config) -> Result<Vec<String>> {
    let command: Vec<String> = match extension {
        Some(extension) => extension.split_whitespace().map(str::to_string).collect(),
        None => config.engine.command.clone(),
    };

    if command.is_empty() {
        return Err(Error::Config(
            "no engine host command; pass --extension or set engine.command".to_string(),
        ));
    }
    Ok(command)
}

#[must_use]
pub fn host_options(cli: &Cli, settings: &EffectiveSettings, workspace: &Path) -> HostOptions {
    HostOptions {
        workspace_path: workspace.to_path_buf(),
        mode: settings.mode.clone(),
        model: settings.model.clone(),
        provider: settings.provider.clone(),
        reasoning_effort: settings.reasoning_effort.clone(),
        consecutive_mistake_limit: cli.consecutive_mistake_limit,
        non_interactive: !settings.require_approval,
        exit_on_error: cli.exit_on_error,
        exit_on_complete: cli.print || settings.oneshot,
        ephemeral: cli.ephemeral,
        debug: cli.debug,
    }
}

async fn read_prompt(cli: &Cli) -> Result<String> {
    if let Some(path) = &cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path).await?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::Config(format!(
                "prompt file is empty: {}",
                path.display()
            )));
        }
        return Ok(prompt.to_string());
    }

    cli.prompt
        .clone()
        .ok_or_else(|| Error::Config("no prompt provided".to_string()))
}

/// Run the command line request to completion and return the exit code.
pub async fn run(cli: Cli) -> Result<u8> {
    let format = cli.output_format;
    install_panic_hook(format);

    let config = Config::load().map_err(|e| Error::Config(format!("{e:#}")))?;
    let settings = effective_settings(&cli, &config)?;
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let command = engine_command(cli.extension.as_deref(), &config)?;

    if cli.stdin_prompt_stream && io::stdin().is_terminal() {
        return Err(Error::Config(
            "--stdin-prompt-stream requires commands piped on stdin".to_string(),
        ));
    }

    let (tx, events) = mpsc::unbounded_channel();
    let engine: Arc<dyn Engine> = Arc::new(BridgeEngine::new(
        command,
        host_options(&cli, &settings, &workspace),
        tx,
    ));

    let code = tokio::select! {
        code = drive(&cli, Arc::clone(&engine), events, workspace) => code,
        code = shutdown_signal() => {
            tracing::info!(code, "received signal, shutting down");
            if !format.is_json() {
                eprintln!("\n[cli] received signal, shutting down...");
            }
            if let Err(e) = engine.send_to_extension(ExtensionMessage::CancelTask).await {
                tracing::debug!(error = %e, "cancel on signal failed");
            }
            code
        }
    };

    if let Err(e) = engine.dispose().await {
        tracing::warn!(error = %e, "failed to dispose engine");
    }
    Ok(code)
}

async fn drive(cli: &Cli, engine: Arc<dyn Engine>, events: EngineEvents, workspace: PathBuf) -> u8 {
    let format = cli.output_format;

    let success = if cli.stdin_prompt_stream {
        run_stdin(Arc::clone(&engine), format, events).await
    } else {
        let mut sink = output_sink(format);
        let outcome = run_single(cli, engine.as_ref(), events, sink.as_mut(), workspace).await;
        report(sink.as_mut(), outcome)
    };

    if let Err(e) = engine.dispose().await {
        tracing::warn!(error = %e, "failed to dispose engine");
    }

    if cli.signal_only_exit {
        let reason = if success {
            "task loop completed"
        } else {
            "task loop failed"
        };
        park(reason, format).await;
    }

    if success { EXIT_SUCCESS } else { EXIT_FAILURE }
}

async fn run_single(
    cli: &Cli,
    engine: &dyn Engine,
    mut events: EngineEvents,
    sink: &mut dyn OutputSink,
    workspace: PathBuf,
) -> Result<Outcome> {
    let request = if cli.is_resume_requested() {
        TaskRequest::Resume {
            session_id: cli
                .requested_session_id()
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            workspace,
        }
    } else {
        TaskRequest::Prompt(read_prompt(cli).await?)
    };

    engine.activate().await?;
    execute(engine, &mut events, sink, request, cli.exit_on_error).await
}

async fn run_stdin(engine: Arc<dyn Engine>, format: OutputFormat, events: EngineEvents) -> bool {
    let mut emitter = JsonEventEmitter::new(format, io::stdout());

    if let Err(e) = engine.activate().await {
        tracing::error!(error = %e, "failed to activate engine");
        if let Err(e) = emitter.emit_error(&e.to_string()) {
            tracing::warn!(error = %e, "failed to write error event");
        }
        return false;
    }

    let lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut session = StdinSession::new(engine, emitter);
    match session.run(lines, events).await {
        Ok(end) => {
            tracing::info!(?end, "stdin session ended");
            end != SessionEnd::EngineClosed
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to write to stdout");
            false
        }
    }
}

fn output_sink(format: OutputFormat) -> Box<dyn OutputSink + Send> {
    match format {
        OutputFormat::Text => Box::new(TextOutput::new(io::stdout(), io::stderr())),
        OutputFormat::Json | OutputFormat::StreamJson => {
            Box::new(JsonEventEmitter::new(format, io::stdout()))
        }
    }
}

/// Write the final outcome to the sink; returns whether the run succeeded.
fn report(sink: &mut dyn OutputSink, outcome: Result<Outcome>) -> bool {
    let success = match outcome {
        Ok(Outcome::Completed { success }) => success,
        Ok(Outcome::Failed(message)) => {
            tracing::warn!(error = %message, "task failed");
            if let Err(e) = sink.on_failure(&message) {
                tracing::warn!(error = %e, "failed to report failure");
            }
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            if let Err(e) = sink.on_failure(&e.to_string()) {
                tracing::warn!(error = %e, "failed to report failure");
            }
            false
        }
    };

    if let Err(e) = sink.finish() {
        tracing::warn!(error = %e, "failed to flush output");
    }
    success
}

/// Keep the process alive until a signal arrives.
async fn park(reason: &str, format: OutputFormat) {
    tracing::info!(reason, "parked until signal");
    if !format.is_json() {
        eprintln!("[cli] {reason} (--signal-only-exit active; waiting for SIGINT/SIGTERM)");
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    loop {
        keepalive.tick().await;
        tracing::trace!("keep-alive");
    }
}

/// Resolve with the exit code of the first SIGINT or SIGTERM.
async fn shutdown_signal() -> u8 {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => EXIT_SIGINT,
                    _ = sigterm.recv() => EXIT_SIGTERM,
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                EXIT_SIGINT
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
        EXIT_SIGINT
    }
}

/// In JSON modes, report panics as an `error` event on stdout.
fn install_panic_hook(format: OutputFormat) {
    if !format.is_json() {
        return;
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let id = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        let event = StreamEvent::new(EventType::Error)
            .with_id(id)
            .with_content(format!("panic: {info}"));
        if let Ok(line) = serde_json::to_string(&event) {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("omni-stream").chain(args.iter().copied()))
    }

    #[test]
    fn flags_override_config_settings() {
        let mut config = Config::default();
        config.agent.mode = Some("architect".to_string());
        config.agent.model = Some("file-model".to_string());

        let cli = parse(&["-p", "--model", "flag-model", "-a", "hi"]);
        let settings = effective_settings(&cli, &config).unwrap();
        assert_eq!(settings.mode, "architect");
        assert_eq!(settings.model.as_deref(), Some("flag-model"));
        assert!(settings.require_approval);
    }

    #[test]
    fn extension_flag_wins_over_config_command() {
        let mut config = Config::default();
        config.engine.command = vec!["node".to_string(), "host.js".to_string()];

        assert_eq!(
            engine_command(Some("bun run host.ts"), &config).unwrap(),
            ["bun", "run", "host.ts"]
        );
        assert_eq!(engine_command(None, &config).unwrap(), ["node", "host.js"]);
        assert!(matches!(
            engine_command(None, &Config::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn host_options_follow_flags() {
        let cli = parse(&["-p", "--exit-on-error", "--consecutive-mistake-limit", "3", "hi"]);
        let settings = effective_settings(&cli, &Config::default()).unwrap();
        let options = host_options(&cli, &settings, Path::new("/w"));

        assert_eq!(options.workspace_path, Path::new("/w"));
        assert_eq!(options.consecutive_mistake_limit, Some(3));
        assert!(options.non_interactive);
        assert!(options.exit_on_error);
        assert!(options.exit_on_complete);
    }

    #[tokio::test]
    async fn prompt_file_is_trimmed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("prompt.md");
        std::fs::write(&path, "\n  fix the bug \n").unwrap();

        let cli = parse(&["-p", "--prompt-file", path.to_str().unwrap()]);
        assert_eq!(read_prompt(&cli).await.unwrap(), "fix the bug");

        std::fs::write(&path, "   ").unwrap();
        assert!(read_prompt(&cli).await.is_err());
    }

    #[test]
    fn outcome_success() {
        assert!(Outcome::Completed { success: true }.is_success());
        assert!(!Outcome::Completed { success: false }.is_success());
        assert!(!Outcome::Failed("boom".to_string()).is_success());
    }
}
