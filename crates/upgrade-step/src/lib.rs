//! Upgrade Step - step contract for the upgrade engine
//!
//! Provides the pieces every step implementation and the engine share:
//! - The [`UpgradeStep`] behaviour trait and [`StepSpec`] registration data
//! - Status, risk and status-result types
//! - The [`UpgradeContext`] session state with its typed property bag
//! - Cooperative [`CancellationToken`]
//! - The legal status transition table
//!
//! # Example
//!
//! ```rust,ignore
//! use upgrade_step::prelude::*;
//!
//! struct Retarget;
//!
//! #[async_trait::async_trait]
//! impl UpgradeStep for Retarget {
//!     fn id(&self) -> &str { "sample.retarget" }
//!     fn title(&self) -> &str { "Update target framework" }
//!
//!     async fn initialize(&mut self, ctx: &mut UpgradeContext, _: &CancellationToken)
//!         -> Result<StatusResult, StepError> {
//!         Ok(StatusResult::incomplete("net48 -> net8.0", BuildBreakRisk::Medium))
//!     }
//!
//!     async fn apply(&mut self, ctx: &mut UpgradeContext, _: &CancellationToken)
//!         -> Result<StatusResult, StepError> {
//!         Ok(StatusResult::complete("Retargeted"))
//!     }
//! }
//!
//! let spec = StepSpec::new(Retarget).depends_on("builtin.backup");
//! ```

pub mod cancel;
pub mod context;
pub mod error;
pub mod state_machine;
pub mod step;
pub mod types;

pub use cancel::CancellationToken;
pub use context::{ProjectRef, PropertyBag, UpgradeContext};
pub use error::{StepError, TransitionError};
pub use step::{ApplicabilityFn, StepParts, StepSpec, UpgradeStep};
pub use types::{BuildBreakRisk, StatusResult, StepId, StepScope, UpgradeStepStatus};

/// Prelude module for step authors
pub mod prelude {
    //! Common imports for implementing steps
    pub use crate::{
        BuildBreakRisk, CancellationToken, ProjectRef, StatusResult, StepError, StepId,
        StepScope, StepSpec, UpgradeContext, UpgradeStep, UpgradeStepStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
