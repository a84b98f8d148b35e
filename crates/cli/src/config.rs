//! Configuration loading from capstan.toml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp::ServerConfig;
use policy::Policy;
use runtime::OrchestratorSettings;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    /// Approval settings.
    #[serde(default)]
    pub approval: Policy,

    /// External tool providers to spawn.
    #[serde(default)]
    pub providers: Vec<ServerConfig>,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Session limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub tool_timeout_secs: u64,
    pub near_limit_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            max_iterations: defaults.max_iterations,
            tool_timeout_secs: defaults.tool_timeout.as_secs(),
            near_limit_threshold: defaults.near_limit_threshold,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Event database; defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "session.max_iterations must be at least 1".into(),
            ));
        }
        if self.session.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.tool_timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(p) = self.providers.iter().find(|p| p.timeout_secs == Some(0)) {
            return Err(ConfigError::Invalid(format!(
                "provider {:?}: timeout_secs must be at least 1",
                p.name
            )));
        }
        if let Some(p) = self.providers.iter().find(|p| p.name.is_empty() || p.command.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "provider {:?} needs both a name and a command",
                p.name
            )));
        }
        Ok(())
    }

    /// Provider launch settings. Servers without their own `timeout_secs`
    /// get the session tool timeout.
    pub fn provider_configs(&self) -> Vec<ServerConfig> {
        self.providers
            .iter()
            .cloned()
            .map(|mut provider| {
                if provider.timeout_secs.is_none() {
                    provider.timeout_secs = Some(self.session.tool_timeout_secs);
                }
                provider
            })
            .collect()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_iterations: self.session.max_iterations,
            tool_timeout: Duration::from_secs(self.session.tool_timeout_secs),
            near_limit_threshold: self.session.near_limit_threshold,
        }
    }

    /// Where the event database lives. `~` is expanded.
    pub fn storage_path(&self) -> Option<PathBuf> {
        match &self.storage.path {
            Some(path) => Some(expand_home(path)),
            None => data_dir().map(|d| d.join("events.db")),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

pub fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/capstan"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("capstan"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("capstan"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
