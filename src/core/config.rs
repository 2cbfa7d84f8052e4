use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a configuration directory for this platform")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// One MCP server endpoint. Unknown keys are rejected so a top-level
/// setting misplaced under a `[[servers]]` table fails the load instead of
/// being silently absorbed by the server entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub url: String,
    /// Omitted means enabled.
    pub enabled: Option<bool>,
}

impl ServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_max_chat_sessions() -> usize {
    64
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Upper bound on model turns per chat request. Omitted means no bound.
    pub max_tool_iterations: Option<u32>,
    /// How many concurrent chat sessions to retain before evicting the
    /// least recently used one.
    #[serde(default = "default_max_chat_sessions")]
    pub max_chat_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            servers: Vec::new(),
            max_tool_iterations: Some(8),
            max_chat_sessions: default_max_chat_sessions(),
        }
    }
}

impl Config {
    /// Loads the configuration, writing a default file on first run so the
    /// user has something to edit.
    pub fn load_or_init() -> Result<Config, ConfigError> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            let config = Config::default();
            config.save_to_path(&config_path)?;
            info!(path = %config_path.display(), "wrote default configuration");
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs =
            ProjectDirs::from("org", "permacommons", "confab").ok_or(ConfigError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    pub fn find_server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|server| server.name.eq_ignore_ascii_case(name))
    }
}
