//! Referral attribution and affiliate commission.
//!
//! Referrals move `pending → completed | expired`; completion prices the
//! commission from product overrides or the referrer's value tier.

pub mod commission;
pub mod engine;
pub mod state_machine;

pub use commission::CommissionCalculator;
pub use engine::ReferralEngine;
pub use state_machine::ReferralStateMachine;
