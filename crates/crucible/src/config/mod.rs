use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CommandContext, CompileStep, DEFAULT_SANDBOX_PATH, FALLBACK_CLASS_NAME, FileExtension,
    Language, RunStep, detect_public_class,
};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Doubles as the default language catalog; library users can access it
/// to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../crucible.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' is not supported")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running submissions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pending-queue capacity; submissions beyond it are refused
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Root directory for per-submission workspaces (OS tempdir if unset)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Hard timeout for webhook deliveries in milliseconds
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// Whether submissions get network access unless they ask otherwise
    #[serde(default)]
    pub enable_network_default: bool,

    /// Run children as this uid (requires privilege; unset = engine's own uid)
    #[serde(default)]
    pub sandbox_uid: Option<u32>,

    /// Run children as this gid
    #[serde(default)]
    pub sandbox_gid: Option<u32>,

    /// Default resource limits applied to all executions.
    /// Overridden by per-language limits, then per-submission overrides.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Language catalog keyed by language key
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl EngineConfig {
    /// Create a new config with the embedded default catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            workspace_root: None,
            callback_timeout_ms: default_callback_timeout_ms(),
            enable_network_default: false,
            sandbox_uid: None,
            sandbox_gid: None,
            default_limits: ResourceLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Look up a language by key
    pub fn get_language(&self, key: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(key)
            .ok_or_else(|| ConfigError::LanguageNotFound(key.to_string()))
    }

    /// The directory under which per-submission workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("crucible"))
    }

    /// Resolve effective run limits: global defaults → language → submission
    pub fn effective_limits(
        &self,
        language: &Language,
        overrides: Option<&ResourceLimits>,
    ) -> ResourceLimits {
        let mut limits = self.default_limits.clone();
        if let Some(ref lang_limits) = language.run.limits {
            limits = limits.with_overrides(lang_limits);
        }
        if let Some(user_limits) = overrides {
            limits = limits.with_overrides(user_limits);
        }
        limits
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_max_concurrent() -> usize {
    50
}

fn default_max_queue_size() -> usize {
    100
}

fn default_callback_timeout_ms() -> u64 {
    5000
}
