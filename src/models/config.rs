//! Configuration models for ergon.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for ergon.
///
/// I^R resolved: All configurable parameters are explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Inference endpoint configuration
    pub provider: ProviderConfig,

    /// Runtime limits (concurrency, retry, checkpointing cadence)
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Input/output/checkpoint paths
    pub io: IoConfig,
}

/// Inference endpoint configuration.
///
/// K_i: The endpoint must speak the OpenAI chat-completions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (can also be set via the `api_key_env` env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the API (e.g. "https://api.moonshot.cn/v1")
    pub base_url: String,

    /// Model ID to request
    pub model: String,

    /// Optional system prompt prepended to every request
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Sampling temperature (omitted from the request when not set)
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff (omitted from the request when not set)
    #[serde(default)]
    pub top_p: Option<f64>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "ERGON_API_KEY".to_string()
}

fn default_timeout() -> u64 {
    180
}

/// Runtime limits for the batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum concurrent in-flight calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Additional attempts after the first failure
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,

    /// Persist the checkpoint after every N merged outcomes
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_retry_times() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_save_interval() -> usize {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry_times: default_retry_times(),
            retry_delay_secs: default_retry_delay(),
            save_interval: default_save_interval(),
        }
    }
}

/// Input/output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Input CSV file (columns: id, question)
    pub input_file: PathBuf,

    /// Output CSV file
    pub output_file: PathBuf,

    /// Directory for checkpoint files
    pub checkpoint_dir: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject limit values the executor cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.runtime.save_interval == 0 {
            return Err(ConfigError::Invalid(
                "runtime.save_interval must be at least 1".to_string(),
            ));
        }
        if self.runtime.retry_delay_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "runtime.retry_delay_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the API key from config or environment.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.provider.api_key {
            return Ok(key.clone());
        }

        std::env::var(&self.provider.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.provider.api_key_env.clone(),
        })
    }
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[provider]
base_url = "https://api.example.com/v1"
model = "test-model"

[io]
input_file = "input.csv"
output_file = "output.csv"
checkpoint_dir = "checkpoints"
"#
    }

    #[test]
    fn defaults_fill_runtime_section() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.runtime.max_concurrent, 5);
        assert_eq!(config.runtime.retry_times, 3);
        assert_eq!(config.runtime.retry_delay_secs, 1.0);
        assert_eq!(config.runtime.save_interval, 10);
        assert_eq!(config.provider.timeout_secs, 180);
        assert_eq!(config.provider.api_key_env, "ERGON_API_KEY");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let toml_str = format!("{}\n[runtime]\nmax_concurrent = 0\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_save_interval_is_rejected() {
        let toml_str = format!("{}\n[runtime]\nsave_interval = 0\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.provider.api_key = Some("sk-test".to_string());
        assert_eq!(config.resolve_api_key().unwrap(), "sk-test");
    }
}
