//! Upgrade Assistant - interactive, resumable project upgrades
//!
//! Puts the step engine in front of a user:
//! - Configuration from TOML plus command-line overrides
//! - Project discovery
//! - An extension registry that contributes steps, with failures isolated
//!   per extension
//! - Built-in project selection and backup steps
//! - The updater sub-step contract for "load inputs, run updaters" steps
//! - The command menu and the interactive / non-interactive driver loop

pub mod commands;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod extension;
pub mod session;
pub mod steps;
pub mod updater;

pub use commands::{commands_for_step, ConsoleOutput, UpgradeCommand, UserOutput};
pub use config::AssistantConfig;
pub use driver::{ConsoleInput, Decision, NonInteractiveInput, RunOutcome, UpgradeRunner, UserInput};
pub use error::{AssistantError, ConfigError, ExtensionError};
pub use extension::{Extension, ExtensionManifest, ExtensionRegistry, LoadReport};
pub use session::{ProjectAnalysis, Session};
pub use updater::{updater_step_spec, InputLoader, Updater, UpdaterGroupStep, UpdaterResult, UpdaterSubStep};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
