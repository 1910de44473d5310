//! Configuration module for Placeholder Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! upload:
//!   accepted_types: ["image/jpeg", "image/png"]
//!   on_failure: "remove"
//! reader:
//!   max_file_size: 10485760
//! adapter:
//!   url: "${UPLOAD_URL:-http://localhost:8080/upload}"
//!   headers:
//!     Authorization: "Bearer ${UPLOAD_TOKEN}"
//! logging:
//!   level: "debug"
//!   format: "json"
//! ```

use crate::controller::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Validate a `type/subtype` MIME pattern (`type/*` allowed)
fn is_valid_mime_pattern(pattern: &str) -> bool {
    match pattern.split_once('/') {
        Some((kind, subtype)) => {
            !kind.is_empty() && !subtype.is_empty() && !subtype.contains('/') && kind != "*"
        }
        None => false,
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Without an adapter no loader can be created
    #[serde(default)]
    pub adapter: Option<AdapterConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = loader::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let upload = &self.upload;
        if upload.accepted_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one accepted type must be configured".into(),
            ));
        }

        for pattern in &upload.accepted_types {
            if !is_valid_mime_pattern(pattern) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid accepted type '{}': must be 'type/subtype' or 'type/*'",
                    pattern
                )));
            }
        }

        for (field, value) in [
            ("element_name", &upload.element_name),
            ("placeholder_attribute", &upload.placeholder_attribute),
            ("source_attribute", &upload.source_attribute),
            ("srcset_attribute", &upload.srcset_attribute),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "upload.{} cannot be empty",
                    field
                )));
            }
        }

        if let Some(ref adapter) = self.adapter {
            if !is_valid_http_url(&adapter.url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid adapter URL '{}': must start with http:// or https://",
                    adapter.url
                )));
            }

            if adapter.field_name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "adapter.field_name cannot be empty".into(),
                ));
            }

            if adapter.timeout_seconds == 0 {
                return Err(ConfigError::ValidationError(
                    "adapter.timeout_seconds must be greater than 0".into(),
                ));
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}

/// Placeholder and command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// MIME types the upload command accepts. Default: jpeg, png, gif, bmp
    #[serde(default = "default_accepted_types")]
    pub accepted_types: Vec<String>,

    /// Element inserted as placeholder. Default: "image"
    #[serde(default = "default_element_name")]
    pub element_name: String,

    /// Attribute carrying the loader id. Default: "uploadId"
    #[serde(default = "default_placeholder_attribute")]
    pub placeholder_attribute: String,

    /// Attribute receiving the preview and final URL. Default: "src"
    #[serde(default = "default_source_attribute")]
    pub source_attribute: String,

    /// Attribute receiving responsive variants. Default: "srcset"
    #[serde(default = "default_srcset_attribute")]
    pub srcset_attribute: String,

    /// What to do with the node after a failed or aborted upload. Default: keep
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            accepted_types: default_accepted_types(),
            element_name: default_element_name(),
            placeholder_attribute: default_placeholder_attribute(),
            source_attribute: default_source_attribute(),
            srcset_attribute: default_srcset_attribute(),
            on_failure: FailurePolicy::default(),
        }
    }
}

fn default_accepted_types() -> Vec<String> {
    crate::controller::command::DEFAULT_ACCEPTED_TYPES
        .iter()
        .map(|t| t.to_string())
        .collect()
}

fn default_element_name() -> String {
    "image".to_string()
}

fn default_placeholder_attribute() -> String {
    "uploadId".to_string()
}

fn default_source_attribute() -> String {
    "src".to_string()
}

fn default_srcset_attribute() -> String {
    "srcset".to_string()
}

/// Local read configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Reject larger files before upload (bytes)
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

/// HTTP upload adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Upload endpoint. Must start with http:// or https://
    pub url: String,

    /// Multipart field carrying the file. Default: "upload"
    #[serde(default = "default_field_name")]
    pub field_name: String,

    /// Request timeout in seconds. Default: 30
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_field_name() -> String {
    crate::upload::simple::DEFAULT_FIELD_NAME.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json". Default: "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
