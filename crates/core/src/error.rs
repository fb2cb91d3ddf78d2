use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::referral::ReferralStatus;

pub type LoyaltyResult<T> = Result<T, LoyaltyError>;

/// Failures returned by every engine operation. All are recoverable
/// validation outcomes except those where [`LoyaltyError::is_fatal`] holds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoyaltyError {
    #[error("Invalid point amount: {0}")]
    InvalidAmount(i64),

    #[error("Insufficient balance: need {requested}, have {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Reward {0} not found")]
    RewardNotFound(Uuid),

    #[error("Reward {0} is inactive")]
    RewardInactive(Uuid),

    #[error("Reward {0} has expired")]
    RewardExpired(Uuid),

    #[error("Minimum purchase not met: need {required}, got {actual}")]
    MinimumPurchaseNotMet { required: Decimal, actual: Decimal },

    #[error("Invalid referral: {0}")]
    InvalidReferral(String),

    #[error("Invalid referral transition from {from} to {to}")]
    InvalidTransition {
        from: ReferralStatus,
        to: ReferralStatus,
    },

    #[error("No applicable commission tier")]
    NoApplicableTier,

    #[error("Loyalty account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error("Referral {0} not found")]
    ReferralNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoyaltyError {
    /// Fatal errors signal operator-fixable configuration and must not be
    /// retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoyaltyError::NoApplicableTier | LoyaltyError::Config(_))
    }
}
