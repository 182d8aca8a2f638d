//! Assistant configuration
//!
//! Loaded from an optional TOML file, then overridden by command-line flags.
//! Every field has a default so an empty file is a valid configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default project file extensions searched during discovery
pub const DEFAULT_PROJECT_EXTENSIONS: &[&str] = &["csproj", "vbproj", "fsproj"];

/// Assistant configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssistantConfig {
    /// Apply steps without prompting
    pub non_interactive: bool,
    /// Pause before each automatic apply, in seconds
    pub non_interactive_wait_secs: u64,
    /// Skip the backup step
    pub skip_backup: bool,
    /// Directory that receives project backups; next to the project if unset
    pub backup_dir: Option<PathBuf>,
    /// Project file extensions, without the leading dot
    pub project_extensions: Vec<String>,
    /// Extensions that must not be loaded
    pub disabled_extensions: Vec<String>,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: Option<String>,
    /// Per-command time limit, in seconds
    pub step_timeout_secs: Option<u64>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            non_interactive: false,
            non_interactive_wait_secs: 0,
            skip_backup: false,
            backup_dir: None,
            project_extensions: DEFAULT_PROJECT_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            disabled_extensions: Vec::new(),
            log_filter: None,
            step_timeout_secs: None,
        }
    }
}

impl AssistantConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Read` if the file cannot be read, `ConfigError::Parse`
    /// for malformed TOML or unknown keys, `ConfigError::Invalid` if the
    /// values fail validation
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "project_extensions must not be empty".to_string(),
            ));
        }
        if let Some(ext) = self
            .project_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(ConfigError::Invalid(format!(
                "project extension {ext:?} must be non-empty and have no leading dot"
            )));
        }
        if self.step_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// With non-interactive mode
    #[inline]
    #[must_use]
    pub fn with_non_interactive(mut self, non_interactive: bool) -> Self {
        self.non_interactive = non_interactive;
        self
    }

    /// With the pause before automatic applies
    #[inline]
    #[must_use]
    pub fn with_non_interactive_wait(mut self, secs: u64) -> Self {
        self.non_interactive_wait_secs = secs;
        self
    }

    /// With backup skipped
    #[inline]
    #[must_use]
    pub fn with_skip_backup(mut self, skip: bool) -> Self {
        self.skip_backup = skip;
        self
    }

    /// With a backup directory
    #[inline]
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// With an extension disabled
    #[must_use]
    pub fn with_disabled_extension(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.disabled_extensions.contains(&name) {
            self.disabled_extensions.push(name);
        }
        self
    }

    /// With a per-command timeout
    #[inline]
    #[must_use]
    pub fn with_step_timeout(mut self, secs: u64) -> Self {
        self.step_timeout_secs = Some(secs);
        self
    }

    /// Pause before automatic applies
    #[inline]
    #[must_use]
    pub fn non_interactive_wait(&self) -> Duration {
        Duration::from_secs(self.non_interactive_wait_secs)
    }

    /// Per-command timeout
    #[inline]
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    /// Check if an extension is disabled
    #[must_use]
    pub fn is_extension_disabled(&self, name: &str) -> bool {
        self.disabled_extensions.iter().any(|d| d == name)
    }
}
