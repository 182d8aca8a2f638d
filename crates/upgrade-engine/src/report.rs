//! Step reports
//!
//! Read-only snapshots of the step tree for display and serialization.

use serde::Serialize;
use upgrade_step::{BuildBreakRisk, StepId, UpgradeStepStatus};

/// Snapshot of one step and its sub-steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Step id
    pub id: StepId,
    /// Step title
    pub title: String,
    /// Step description
    pub description: String,
    /// Current status
    pub status: UpgradeStepStatus,
    /// Status details
    pub details: String,
    /// Max risk over the step and its active sub-steps
    pub risk: BuildBreakRisk,
    /// Sub-step reports in execution order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<StepReport>,
}

impl StepReport {
    /// Depth-first iterator over this report and its descendants with their
    /// nesting depth
    pub fn walk(&self) -> impl Iterator<Item = (usize, &StepReport)> + '_ {
        let mut stack = vec![(0usize, self)];
        std::iter::from_fn(move || {
            let (depth, report) = stack.pop()?;
            stack.extend(report.sub_steps.iter().rev().map(|s| (depth + 1, s)));
            Some((depth, report))
        })
    }

    /// Render as an indented plain-text listing
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (depth, report) in self.walk() {
            let indent = "  ".repeat(depth);
            out.push_str(&format!(
                "{indent}[{}] {} (risk: {})",
                report.status, report.title, report.risk
            ));
            if !report.details.is_empty() {
                out.push_str(&format!(" - {}", report.details));
            }
            out.push('\n');
        }
        out
    }
}
