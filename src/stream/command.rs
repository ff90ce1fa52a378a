//! Stdin command schema.

use std::fmt;

use serde_json::{Map, Value};

/// Name of a stdin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Start,
    Message,
    Cancel,
    Ping,
    Shutdown,
}

impl CommandName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Message => "message",
            Self::Cancel => "cancel",
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "message" => Some(Self::Message),
            "cancel" => Some(Self::Cancel),
            "ping" => Some(Self::Ping),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated stdin command.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    /// Begin a new task.
    Start {
        request_id: String,
        prompt: String,
        configuration: Option<Value>,
    },
    /// Inject a message into the running task.
    Message { request_id: String, prompt: String },
    /// Interrupt the running task.
    Cancel { request_id: String },
    /// Liveness probe.
    Ping { request_id: String },
    /// Terminate the session.
    Shutdown { request_id: String },
}

impl InputCommand {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Start { request_id, .. }
            | Self::Message { request_id, .. }
            | Self::Cancel { request_id }
            | Self::Ping { request_id }
            | Self::Shutdown { request_id } => request_id,
        }
    }

    #[must_use]
    pub const fn name(&self) -> CommandName {
        match self {
            Self::Start { .. } => CommandName::Start,
            Self::Message { .. } => CommandName::Message,
            Self::Cancel { .. } => CommandName::Cancel,
            Self::Ping { .. } => CommandName::Ping,
            Self::Shutdown { .. } => CommandName::Shutdown,
        }
    }
}

/// A stdin line that is not a valid command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("command must carry a non-empty requestId")]
    MissingRequestId { command: Option<String> },

    #[error("unknown command: {command}")]
    UnknownCommand {
        request_id: String,
        command: String,
    },

    #[error("{command} requires a prompt")]
    MissingPrompt {
        request_id: String,
        command: CommandName,
    },
}

impl CommandError {
    /// Machine-readable code reported in the `control` error event.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::MissingRequestId { .. } => "missing_request_id",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::MissingPrompt { .. } => "missing_prompt",
        }
    }

    /// Best-effort request identifier to echo back.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) | Self::MissingRequestId { .. } => None,
            Self::UnknownCommand { request_id, .. } | Self::MissingPrompt { request_id, .. } => {
                Some(request_id)
            }
        }
    }

    /// Best-effort command name to echo back.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) => None,
            Self::MissingRequestId { command } => command.as_deref(),
            Self::UnknownCommand { command, .. } => Some(command),
            Self::MissingPrompt { command, .. } => Some(command.as_str()),
        }
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Parse and validate one stdin line.
///
/// Unknown fields are ignored.
pub fn parse_command(line: &str) -> Result<InputCommand, CommandError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| CommandError::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(CommandError::InvalidJson(
            "expected a JSON object".to_string(),
        ));
    };

    let command = string_field(&object, "command");
    let Some(request_id) = string_field(&object, "requestId").filter(|id| !id.is_empty()) else {
        return Err(CommandError::MissingRequestId {
            command: command.map(str::to_string),
        });
    };
    let request_id = request_id.to_string();

    let Some(name) = command.and_then(CommandName::parse) else {
        return Err(CommandError::UnknownCommand {
            request_id,
            command: command.unwrap_or_default().to_string(),
        });
    };

    let prompt = string_field(&object, "prompt").map(str::to_string);
    let require_prompt = |request_id: String| {
        prompt.clone().ok_or(CommandError::MissingPrompt {
            request_id,
            command: name,
        })
    };

    Ok(match name {
        CommandName::Start => InputCommand::Start {
            prompt: require_prompt(request_id.clone())?,
            configuration: object.get("configuration").filter(|v| v.is_object()).cloned(),
            request_id,
        },
        CommandName::Message => InputCommand::Message {
            prompt: require_prompt(request_id.clone())?,
            request_id,
        },
        CommandName::Cancel => InputCommand::Cancel { request_id },
        CommandName::Ping => InputCommand::Ping { request_id },
        CommandName::Shutdown => InputCommand::Shutdown { request_id },
    })
}
