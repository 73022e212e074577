//! Capability gate: what a verification status allows.
//!
//! Pure functions only. Capabilities are recomputed on every read and
//! never cached across a verification transition.

use serde::Serialize;
use trustgate_common::{Action, CapabilitySet, VerificationStatus, VerificationStep};

/// An action was refused; `required_step` is the flow that unlocks it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Blocked {
    pub required_step: VerificationStep,
}

/// Map a status to its capabilities
pub fn derive(status: &VerificationStatus) -> CapabilitySet {
    CapabilitySet {
        can_buy: status.is_organization_email_verified(),
        can_contact: status.is_organization_email_verified(),
        can_sell: status.is_fully_verified(),
    }
}

/// Check whether `action` is allowed under `status`
pub fn check_capability(status: &VerificationStatus, action: Action) -> Result<(), Blocked> {
    if derive(status).allows(action) {
        return Ok(());
    }

    let required_step = match action {
        Action::Buy | Action::Contact => VerificationStep::Organization,
        Action::Sell if status.is_organization_email_verified() => VerificationStep::Identity,
        Action::Sell => VerificationStep::Organization,
    };

    Err(Blocked { required_step })
}
