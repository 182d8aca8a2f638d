//! Built-in steps
//!
//! - [`ProjectSelectionStep`] picks the next project
//! - [`BackupStep`] backs the selected project up before it is modified

pub mod backup;
pub mod select_project;

pub use backup::{BackupStep, BACKUP_MARKER, BACKUP_STEP_ID};
pub use select_project::{ProjectSelectionStep, SELECT_PROJECT_STEP_ID};
