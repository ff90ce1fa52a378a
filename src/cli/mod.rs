//! Command line parsing and validation.

use std::path::PathBuf;

use clap::Parser;

use crate::build_info;
use crate::stream::OutputFormat;

/// Omni stream - run the Omni agent headless over an NDJSON protocol.
#[derive(Debug, Parser)]
#[command(name = "omni-stream")]
#[command(about = "Run the Omni agent headless with text, JSON or streaming JSON output")]
#[command(version = build_info::VERSION, long_version = build_info::LONG_VERSION)]
pub struct Cli {
    /// Prompt for the task.
    pub prompt: Option<String>,

    /// Read the prompt from a file instead of the command line.
    #[arg(long, value_name = "PATH")]
    pub prompt_file: Option<PathBuf>,

    /// Resume a specific task by id.
    #[arg(long, value_name = "TASK_ID", conflicts_with = "continue")]
    pub session_id: Option<String>,

    /// Resume the most recent task in the current workspace.
    #[arg(short, long)]
    pub r#continue: bool,

    /// Workspace directory (defaults to the current directory).
    #[arg(short, long, value_name = "PATH")]
    pub workspace: Option<PathBuf>,

    /// Print the response and exit (non-interactive mode).
    #[arg(short, long)]
    pub print: bool,

    /// Read NDJSON commands from stdin (requires --print and stream-json).
    #[arg(long)]
    pub stdin_prompt_stream: bool,

    /// Only exit on SIGINT/SIGTERM, never on completion or errors.
    #[arg(long)]
    pub signal_only_exit: bool,

    /// Command that starts the engine host.
    #[arg(short, long, value_name = "COMMAND", env = "OMNI_ENGINE_COMMAND")]
    pub extension: Option<String>,

    /// Enable debug output.
    #[arg(short, long)]
    pub debug: bool,

    /// Require manual approval for actions.
    #[arg(short = 'a', long)]
    pub require_approval: bool,

    /// Provider to use.
    #[arg(long)]
    pub provider: Option<String>,

    /// Model to use.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Mode to start in (code, architect, ask, debug, ...).
    #[arg(long)]
    pub mode: Option<String>,

    /// Reasoning effort (unspecified, disabled, none, minimal, low, medium, high, xhigh).
    #[arg(short, long)]
    pub reasoning_effort: Option<String>,

    /// Consecutive mistake limit before asking for guidance (0 disables it).
    #[arg(long, value_name = "LIMIT")]
    pub consecutive_mistake_limit: Option<u32>,

    /// Fail on API request errors instead of retrying.
    #[arg(long)]
    pub exit_on_error: bool,

    /// Run without persisting engine state.
    #[arg(long)]
    pub ephemeral: bool,

    /// Exit upon task completion.
    #[arg(long)]
    pub oneshot: bool,

    /// Output format: text, json (single result) or stream-json.
    #[arg(long, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Trimmed `--session-id`, if given.
    #[must_use]
    pub fn requested_session_id(&self) -> Option<&str> {
        self.session_id.as_deref().map(str::trim)
    }

    /// Whether a previous task should be resumed.
    #[must_use]
    pub fn is_resume_requested(&self) -> bool {
        self.requested_session_id().is_some_and(|id| !id.is_empty()) || self.r#continue
    }

    fn has_prompt(&self) -> bool {
        self.prompt.is_some() || self.prompt_file.is_some()
    }

    /// Check flag combinations that clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.requested_session_id() == Some("") {
            anyhow::bail!("--session-id requires a non-empty task id");
        }
        if self.is_resume_requested() && self.has_prompt() {
            anyhow::bail!("cannot use prompt or --prompt-file with --session-id/--continue");
        }
        if self.output_format != OutputFormat::Text && !self.print {
            anyhow::bail!("--output-format requires --print mode");
        }

        if self.stdin_prompt_stream {
            if !self.print {
                anyhow::bail!("--stdin-prompt-stream requires --print mode");
            }
            if self.output_format != OutputFormat::StreamJson {
                anyhow::bail!("--stdin-prompt-stream requires --output-format=stream-json");
            }
            if self.has_prompt() {
                anyhow::bail!(
                    "cannot use positional prompt or --prompt-file with --stdin-prompt-stream"
                );
            }
            if self.is_resume_requested() {
                anyhow::bail!("cannot use --session-id/--continue with --stdin-prompt-stream");
            }
        } else if self.signal_only_exit {
            anyhow::bail!("--signal-only-exit requires --stdin-prompt-stream");
        }

        if !self.has_prompt() && !self.stdin_prompt_stream && !self.is_resume_requested() {
            anyhow::bail!("no prompt provided");
        }

        Ok(())
    }
}
