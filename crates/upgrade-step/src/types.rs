//! Core step types
//!
//! Defines the fundamental value types shared by steps and the engine:
//! - Step identity
//! - Step status and build-break risk
//! - Status results returned by step operations
//! - Step scope (solution-wide or per project)

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Globally unique step identifier
///
/// Ids are plain strings chosen by the step author (for example
/// `builtin.backup`) and must stay stable across releases because other
/// steps refer to them in their dependency lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Create a new step id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Status of an upgrade step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpgradeStepStatus {
    /// Not yet initialized; the only legal initial value
    #[default]
    Unknown,
    /// Initialized and waiting to be applied
    Incomplete,
    /// Applied, or nothing to do
    Complete,
    /// Explicitly skipped
    Skipped,
    /// Initialize or apply failed; may be retried or skipped
    Failed,
}

impl UpgradeStepStatus {
    /// Complete, Skipped or Failed
    #[inline]
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped | Self::Failed)
    }

    /// Incomplete or Failed. Failed steps keep being offered until they are
    /// retried successfully or skipped.
    #[inline]
    #[must_use]
    pub fn needs_action(self) -> bool {
        matches!(self, Self::Incomplete | Self::Failed)
    }

    /// Complete or Skipped
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    /// Lower-case display name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Incomplete => "incomplete",
            Self::Complete => "complete",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UpgradeStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated likelihood that applying a step breaks the build
///
/// Ordered so that `max()` yields the riskiest value when aggregating
/// sub-step risk into a parent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum BuildBreakRisk {
    /// Not estimated
    #[default]
    Unknown,
    /// No risk
    None,
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
}

impl std::fmt::Display for BuildBreakRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Where a step applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepScope {
    /// Runs once for the whole solution
    #[default]
    Solution,
    /// Runs once per project; reset whenever the current project changes
    Project,
}

/// Outcome of initializing or applying a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    /// Resulting status
    pub status: UpgradeStepStatus,
    /// Human readable explanation
    pub details: String,
    /// Build-break risk estimate
    pub risk: BuildBreakRisk,
}

impl StatusResult {
    /// Create a new status result
    #[inline]
    #[must_use]
    pub fn new(status: UpgradeStepStatus, details: impl Into<String>, risk: BuildBreakRisk) -> Self {
        Self {
            status,
            details: details.into(),
            risk,
        }
    }

    /// Step has work left to do
    #[inline]
    #[must_use]
    pub fn incomplete(details: impl Into<String>, risk: BuildBreakRisk) -> Self {
        Self::new(UpgradeStepStatus::Incomplete, details, risk)
    }

    /// Step has nothing (more) to do
    #[inline]
    #[must_use]
    pub fn complete(details: impl Into<String>) -> Self {
        Self::new(UpgradeStepStatus::Complete, details, BuildBreakRisk::None)
    }

    /// Step was skipped
    #[inline]
    #[must_use]
    pub fn skipped(details: impl Into<String>) -> Self {
        Self::new(UpgradeStepStatus::Skipped, details, BuildBreakRisk::None)
    }

    /// Step failed
    #[inline]
    #[must_use]
    pub fn failed(details: impl Into<String>) -> Self {
        Self::new(UpgradeStepStatus::Failed, details, BuildBreakRisk::Unknown)
    }

    /// Replace the risk estimate
    #[inline]
    #[must_use]
    pub fn with_risk(mut self, risk: BuildBreakRisk) -> Self {
        self.risk = risk;
        self
    }
}
