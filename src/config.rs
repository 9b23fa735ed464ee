//! Configuration file parser for ~/.config/feedaudit/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{ClassifierOptions, ExceptionList, ExceptionRule};
use crate::report::OutputFormat;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request timeout in seconds, body included. 0 = no timeout.
    pub timeout_secs: u64,

    /// Maximum number of feed requests in flight. 0 = unbounded.
    pub max_concurrent_requests: usize,

    /// Match `xml` in the Content-Type header case-sensitively.
    pub content_type_case_sensitive: bool,

    /// Output format for per-feed lines.
    pub format: OutputFormat,

    /// Feeds accepted on status 200 regardless of Content-Type.
    /// Setting this key replaces the built-in list.
    pub exceptions: Vec<ExceptionRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_concurrent_requests: 10,
            content_type_case_sensitive: true,
            format: OutputFormat::Text,
            exceptions: crate::feed::builtin_exception_rules(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "timeout_secs",
        "max_concurrent_requests",
        "content_type_case_sensitive",
        "format",
        "exceptions",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            exceptions = config.exceptions.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            timeout: self.timeout(),
            content_type_case_sensitive: self.content_type_case_sensitive,
        }
    }

    pub fn exception_list(&self) -> ExceptionList {
        ExceptionList::new(self.exceptions.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
