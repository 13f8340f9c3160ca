//! Configuration file support for the generation service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "stylist.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StylistConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key (optional - falls back to GEMINI_API_KEY / GOOGLE_API_KEY)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_filename")]
    pub filename: PathBuf,
}

// Defaults

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_filename() -> PathBuf {
    PathBuf::from(crate::generation::export::DEFAULT_FILENAME)
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            filename: default_filename(),
        }
    }
}

impl StylistConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: StylistConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from an explicit path, or the first config file found, or defaults
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match find_config() {
                Some(path) => {
                    tracing::debug!("Using config file {}", path.display());
                    Self::from_file(path)?
                }
                None => Self::default(),
            },
        };
        Ok(config.with_env_api_key())
    }

    /// Fill a missing API key from the environment
    pub fn with_env_api_key(mut self) -> Self {
        if self.gemini.api_key.is_none() {
            self.gemini.api_key = ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
                .iter()
                .find_map(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty());
        }
        self
    }
}

fn find_config() -> Option<PathBuf> {
    // Try current directory first
    let local_config = PathBuf::from(CONFIG_FILE_NAME);
    if local_config.exists() {
        return Some(local_config);
    }

    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}
