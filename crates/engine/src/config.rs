//! Controller configuration via `cordon.toml`
//!
//! A controller is opened from a `ControllerConfig`, either built in code or
//! read from a TOML file. Every field has a default, so an empty file is a
//! valid configuration.

use cordon_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "cordon.toml";

/// Default bound on bodies waiting for the home context.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Configuration for one controller and its home context.
///
/// # Example
///
/// ```toml
/// # Name of the home thread: "cordon-home-<name>"
/// name = "companies"
///
/// # Bodies allowed to wait for the home context before submissions fail
/// queue_capacity = 4096
///
/// # Run queued bodies before the home context shuts down
/// drain_on_shutdown = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Name used for the home thread and in log events.
    #[serde(default = "default_name")]
    pub name: String,
    /// Maximum number of bodies waiting in the home-context queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Whether bodies still queued at shutdown run before the store closes.
    #[serde(default = "default_drain_on_shutdown")]
    pub drain_on_shutdown: bool,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_drain_on_shutdown() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            queue_capacity: default_queue_capacity(),
            drain_on_shutdown: default_drain_on_shutdown(),
        }
    }
}

impl ControllerConfig {
    /// Default config with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set whether queued bodies run at shutdown.
    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Check the config for values the bridge cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the queue capacity is zero or the name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ControllerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Cordon controller configuration
#
# Name of the home context; the home thread is called "cordon-home-<name>"
name = "default"

# Bodies allowed to wait for the home context (default: 4096).
# Submissions beyond this fail with QueueFull instead of blocking.
queue_capacity = 4096

# Run bodies still queued when the controller shuts down (default: true).
# When false they fail with ContextUnavailable.
drain_on_shutdown = true
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.drain_on_shutdown);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_toml_parses_to_default() {
        let config = ControllerConfig::from_toml_str(ControllerConfig::default_toml()).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ControllerConfig::from_toml_str("queue_capacity = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = ControllerConfig::named("  ").validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = ControllerConfig::from_toml_str("queue_capacity = \"many\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ControllerConfig::named("companies")
            .with_queue_capacity(8)
            .with_drain_on_shutdown(false);
        config.write_to_file(&path).unwrap();

        let loaded = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = ControllerConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
