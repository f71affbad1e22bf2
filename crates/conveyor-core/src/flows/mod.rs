//! Delivery flows the orchestrator delegates to
//!
//! - [`RequirementsFlow`]: analysis, affected repositories, feature splits
//! - [`CodeChangeFlow`]: one instance per repository; branch, PR, CI build
//! - [`ReleaseFlow`]: readiness gate, release notes, release work item

mod code_change;
mod release;
mod requirements;

pub use code_change::{ChangeOutcome, ChangeReport, CodeChangeFlow, FixPlan};
pub use release::{
    ComponentReadiness, ReadinessReport, ReleaseAttempt, ReleaseBranch, ReleaseFlow,
    ReleaseOutcome, ReleasePlan, RELEASE_MANAGER_AGENT_ID,
};
pub use requirements::{
    parse_story_sections, Complexity, Requirements, RequirementsFlow, SplitOutcome,
    REQUIREMENTS_AGENT_ID,
};

use crate::error::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Stop before the next side effect once `cancel` has fired.
pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
