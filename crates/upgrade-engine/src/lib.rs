//! Upgrade Engine - dependency-ordered, resumable step execution
//!
//! Turns a registered forest of steps into an executable tree and drives it:
//! - [`StepOrderer`] registers steps and validates dependency declarations
//! - [`UpgradeManager`] finds the next step that needs action, applies,
//!   skips and resets steps
//! - [`StepReport`] snapshots the tree for display and JSON output
//!
//! # Example
//!
//! ```rust,ignore
//! use upgrade_engine::prelude::*;
//!
//! let mut orderer = StepOrderer::new();
//! orderer.register(StepSpec::new(Backup));
//! orderer.register(StepSpec::new(Retarget).depends_on("builtin.backup"));
//!
//! let mut manager = orderer.build(UpgradeContext::new("app.sln"))?;
//! let cancel = CancellationToken::new();
//! while let Some(step) = manager.next_step(&cancel).await? {
//!     manager.apply(step, &cancel).await?;
//! }
//! ```

pub mod error;
mod graph;
pub mod manager;
pub mod node;
pub mod orderer;
pub mod report;
pub mod tree;

pub use error::EngineError;
pub use manager::UpgradeManager;
pub use node::{StepIndex, StepNode, APPLY_CANCELLED};
pub use orderer::StepOrderer;
pub use report::StepReport;
pub use tree::StepTree;

/// Prelude module for convenient imports
pub mod prelude {
    //! Common imports for driving an upgrade
    pub use crate::{EngineError, StepIndex, StepOrderer, StepReport, UpgradeManager};
    pub use upgrade_step::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
