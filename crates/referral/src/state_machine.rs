use serde::{Deserialize, Serialize};

use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::referral::ReferralStatus;

/// Describes a single valid state transition for a referral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ReferralStatus,
    pub to: ReferralStatus,
    pub trigger: String,
}

/// Guards the referral lifecycle by enforcing a finite set of valid
/// state transitions. `Completed` and `Expired` have no outgoing edges.
#[derive(Debug, Clone)]
pub struct ReferralStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl ReferralStateMachine {
    pub fn new() -> Self {
        let transitions = vec![
            StateTransition {
                from: ReferralStatus::Pending,
                to: ReferralStatus::Completed,
                trigger: "purchase_confirmed".to_string(),
            },
            StateTransition {
                from: ReferralStatus::Pending,
                to: ReferralStatus::Expired,
                trigger: "window_elapsed".to_string(),
            },
        ];
        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: ReferralStatus, to: ReferralStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Validates moving from `from` to `to`.
    pub fn check(&self, from: ReferralStatus, to: ReferralStatus) -> LoyaltyResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(LoyaltyError::InvalidTransition { from, to })
        }
    }
}

impl Default for ReferralStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
