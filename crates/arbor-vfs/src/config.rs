//! VFS configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration:
//!
//! ```toml
//! umask = "022"
//! home_root = "/home"
//! max_symlink_depth = 40
//! event_capacity = 1024
//! ```

use arbor_types::Mode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a [`FileSystem`](crate::FileSystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Umask applied when the caller's context does not carry one.
    #[serde(with = "octal_mode")]
    pub umask: Mode,
    /// Directory under which `~user` expands.
    pub home_root: String,
    /// Symbolic link hops before a lookup gives up.
    pub max_symlink_depth: u32,
    /// Capacity of the change-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            umask: Mode::new(0o022),
            home_root: String::from("/home"),
            max_symlink_depth: 40,
            event_capacity: 1024,
        }
    }
}

impl VfsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: VfsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.home_root.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "home_root must be absolute: {}",
                self.home_root
            )));
        }
        if self.max_symlink_depth == 0 {
            return Err(ConfigError::Invalid("max_symlink_depth must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Modes are written as octal strings in config files.
mod octal_mode {
    use arbor_types::Mode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &Mode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:03o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Mode, D::Error> {
        let s = String::deserialize(deserializer)?;
        Mode::from_octal(&s).map_err(serde::de::Error::custom)
    }
}
