//! Error types for the upgrade assistant
//!
//! Provides error handling for:
//! - Configuration loading
//! - Extension loading (isolated per extension)
//! - Project discovery
//! - Driving the engine from the command loop

use std::path::PathBuf;
use upgrade_engine::EngineError;

/// Exit code for a completed or exited run
pub const EXIT_OK: i32 = 0;
/// Exit code for configuration errors (bad config file, invalid step graph)
pub const EXIT_CONFIGURATION: i32 = 1;
/// Exit code for a step breaking the step contract
pub const EXIT_CONTRACT_VIOLATION: i32 = 2;
/// Exit code for a non-interactive run stopped on a failed step
pub const EXIT_STEP_FAILED: i32 = 3;
/// Exit code for a cancelled run
pub const EXIT_CANCELLED: i32 = 130;

/// Main assistant error type
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Engine error (ordering, contract violation, cancellation)
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input path does not exist
    #[error("input path not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// No project files under the input path
    #[error("no projects found under {}", .0.display())]
    NoProjects(PathBuf),

    /// Input chose a command outside the menu
    #[error("invalid command choice {choice} (menu has {available} entries)")]
    InvalidChoice {
        /// Chosen index
        choice: usize,
        /// Menu length
        available: usize,
    },

    /// User input stream closed
    #[error("user input closed")]
    InputClosed,

    /// A command did not finish in time
    #[error("command {command} timed out after {duration_secs}s")]
    Timeout {
        /// Command name
        command: String,
        /// Configured timeout
        duration_secs: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl AssistantError {
    /// Check if the run was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Engine(err) => err.is_cancelled(),
            _ => false,
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            _ if self.is_cancelled() => EXIT_CANCELLED,
            Self::Engine(err) if err.is_contract_violation() => EXIT_CONTRACT_VIOLATION,
            _ => EXIT_CONFIGURATION,
        }
    }
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid configuration TOML
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// Values are individually valid but inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Extension loading errors
///
/// Each failure is confined to the extension that caused it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    /// Extension reported an error while producing steps
    #[error("extension {extension} failed: {message}")]
    Failed {
        /// Extension name
        extension: String,
        /// Reported message
        message: String,
    },

    /// Extension panicked
    #[error("extension {extension} panicked: {message}")]
    Panicked {
        /// Extension name
        extension: String,
        /// Panic payload, if it was a string
        message: String,
    },

    /// Extension was built against another extension API
    #[error("extension {extension} targets API version {found}, expected {expected}")]
    ApiVersionMismatch {
        /// Extension name
        extension: String,
        /// Host API version
        expected: u32,
        /// Extension API version
        found: u32,
    },
}

impl ExtensionError {
    /// Create a failure for an extension
    #[inline]
    pub fn failed(extension: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            extension: extension.into(),
            message: message.into(),
        }
    }

    /// Name of the extension that failed
    #[must_use]
    pub fn extension(&self) -> &str {
        match self {
            Self::Failed { extension, .. }
            | Self::Panicked { extension, .. }
            | Self::ApiVersionMismatch { extension, .. } => extension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upgrade_step::StepId;

    #[test]
    fn exit_codes_follow_error_class() {
        let config: AssistantError = EngineError::CyclicDependency {
            cycle: vec![StepId::from("a"), StepId::from("b")],
        }
        .into();
        assert_eq!(config.exit_code(), EXIT_CONFIGURATION);

        let contract: AssistantError = EngineError::NotInitialized(StepId::from("a")).into();
        assert_eq!(contract.exit_code(), EXIT_CONTRACT_VIOLATION);

        let cancelled: AssistantError = EngineError::Cancelled.into();
        assert_eq!(cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(AssistantError::Cancelled.exit_code(), EXIT_CANCELLED);

        assert_eq!(
            AssistantError::NoProjects(PathBuf::from("/src")).exit_code(),
            EXIT_CONFIGURATION
        );
    }

    #[test]
    fn engine_errors_display_transparently() {
        let err: AssistantError = EngineError::DuplicateStep(StepId::from("a")).into();
        assert_eq!(err.to_string(), "duplicate step id: a");
    }

    #[test]
    fn extension_error_names_extension() {
        let err = ExtensionError::failed("nuget", "feed unreachable");
        assert_eq!(err.extension(), "nuget");
        assert_eq!(err.to_string(), "extension nuget failed: feed unreachable");
    }
}
