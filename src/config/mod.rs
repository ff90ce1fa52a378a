//! Configuration management for omni-stream.
//!
//! Settings come from a global TOML file, optionally overridden by a
//! project-local one. Command line flags override both; built-in defaults
//! fill whatever is left.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Mode used when neither a flag nor a settings file names one.
pub const DEFAULT_MODE: &str = "code";

/// Reasoning effort values the engine understands.
pub const REASONING_EFFORTS: &[&str] = &[
    "unspecified",
    "disabled",
    "none",
    "minimal",
    "low",
    "medium",
    "high",
    "xhigh",
];

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent settings.
    pub agent: AgentSettings,

    /// Engine host settings.
    pub engine: EngineConfig,
}

/// Agent settings; unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub mode: Option<String>,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub provider: Option<String>,
    pub oneshot: Option<bool>,
    pub require_approval: Option<bool>,
}

/// How to start the engine host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program and arguments.
    pub command: Vec<String>,
}

/// Settings after applying flags, files and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub mode: String,
    pub model: Option<String>,
    /// `None` when the effort is `unspecified`.
    pub reasoning_effort: Option<String>,
    pub provider: Option<String>,
    pub oneshot: bool,
    pub require_approval: bool,
}

impl AgentSettings {
    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merge(&mut self, other: Self) {
        fn take<T>(field: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *field = value;
            }
        }

        take(&mut self.mode, other.mode);
        take(&mut self.model, other.model);
        take(&mut self.reasoning_effort, other.reasoning_effort);
        take(&mut self.provider, other.provider);
        take(&mut self.oneshot, other.oneshot);
        take(&mut self.require_approval, other.require_approval);
    }

    /// Apply built-in defaults and validate.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown reasoning effort.
    pub fn resolve(&self) -> anyhow::Result<EffectiveSettings> {
        let reasoning_effort = match self.reasoning_effort.as_deref() {
            None | Some("unspecified") => None,
            Some(effort) if REASONING_EFFORTS.contains(&effort) => Some(effort.to_string()),
            Some(effort) => anyhow::bail!(
                "invalid reasoning effort: {effort}, must be one of: {}",
                REASONING_EFFORTS.join(", ")
            ),
        };

        Ok(EffectiveSettings {
            mode: self
                .mode
                .clone()
                .unwrap_or_else(|| DEFAULT_MODE.to_string()),
            model: self.model.clone(),
            reasoning_effort,
            provider: self.provider.clone(),
            oneshot: self.oneshot.unwrap_or(false),
            require_approval: self.require_approval.unwrap_or(false),
        })
    }
}

impl Config {
    /// Load configuration from the default paths.
    ///
    /// Loads global config first, then merges project-local config if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let project = Self::project_config_path().ok();
        Self::load_from(&Self::config_path()?, project.as_deref())
    }

    /// Load from explicit global and project paths; missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_from(global: &Path, project: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::read(global)?.unwrap_or_default();

        if let Some(project_config) = project.map(Self::read).transpose()?.flatten() {
            config.merge(project_config);
        }

        tracing::debug!(path = %global.display(), "configuration loaded");
        Ok(config)
    }

    fn read(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        Ok(Some(config))
    }

    /// Merge another config into this one (project overrides global).
    fn merge(&mut self, other: Self) {
        self.agent.merge(other.agent);
        if !other.engine.command.is_empty() {
            self.engine.command = other.engine.command;
        }
    }

    /// Get the project-local configuration file path.
    ///
    /// Looks for `.omni/stream.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn project_config_path() -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(".omni").join("stream.toml"))
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/omni/stream/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("omni").join("stream"));
        }

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                return Ok(PathBuf::from(home)
                    .join(".config")
                    .join("omni")
                    .join("stream"));
            }
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("omni").join("stream"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = AgentSettings::default().resolve().unwrap();
        assert_eq!(settings.mode, DEFAULT_MODE);
        assert!(settings.model.is_none());
        assert!(!settings.require_approval);
        assert!(!settings.oneshot);
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = AgentSettings {
            mode: Some("architect".to_string()),
            model: Some("file-model".to_string()),
            ..AgentSettings::default()
        };
        settings.merge(AgentSettings {
            model: Some("flag-model".to_string()),
            ..AgentSettings::default()
        });

        let effective = settings.resolve().unwrap();
        assert_eq!(effective.mode, "architect");
        assert_eq!(effective.model.as_deref(), Some("flag-model"));
    }

    #[test]
    fn unspecified_reasoning_effort_is_dropped() {
        let settings = AgentSettings {
            reasoning_effort: Some("unspecified".to_string()),
            ..AgentSettings::default()
        };
        assert!(settings.resolve().unwrap().reasoning_effort.is_none());

        let settings = AgentSettings {
            reasoning_effort: Some("extreme".to_string()),
            ..AgentSettings::default()
        };
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn missing_files_give_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("config.toml"), None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn project_config_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("config.toml");
        let project = temp_dir.path().join("stream.toml");

        std::fs::write(
            &global,
            r#"
[agent]
mode = "ask"
model = "global-model"

[engine]
command = ["node", "host.js"]
"#,
        )
        .unwrap();
        std::fs::write(
            &project,
            r#"
[agent]
model = "project-model"
require_approval = true
"#,
        )
        .unwrap();

        let config = Config::load_from(&global, Some(&project)).unwrap();
        assert_eq!(config.agent.mode.as_deref(), Some("ask"));
        assert_eq!(config.agent.model.as_deref(), Some("project-model"));
        assert_eq!(config.agent.require_approval, Some(true));
        assert_eq!(config.engine.command, ["node", "host.js"]);
    }

    #[test]
    fn invalid_toml_names_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("config.toml");
        std::fs::write(&global, "agent = [").unwrap();

        let err = Config::load_from(&global, None).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
