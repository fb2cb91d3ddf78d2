//! Referral attribution and commission rate types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Referral lifecycle. `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Completed,
    Expired,
}

impl ReferralStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReferralStatus::Pending)
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Completed => "completed",
            ReferralStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A tracked introduction of one customer by another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_customer_id: Uuid,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub purchase_amount: Option<Decimal>,
    pub product_id: Option<String>,
    /// Set iff `status == Completed`.
    pub commission_earned: Option<Decimal>,
    /// Purchase-confirmation event that completed this referral.
    pub event_id: Option<String>,
}

/// Qualifying purchase reported by order fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifyingPurchase {
    pub product_id: String,
    pub amount: Decimal,
    pub event_id: String,
}

/// Rate band keyed by a referrer's cumulative completed-referral value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionTier {
    pub min_referral_value: Decimal,
    /// Fraction of purchase value, 0–1.
    pub base_commission_rate: Decimal,
}

/// Per-product override of the tier rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCommission {
    pub product_id: String,
    pub commission_rate: Decimal,
    #[serde(default)]
    pub flat_commission: Option<Decimal>,
    pub is_active: bool,
}

/// Aggregate payout view for one referrer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReferralEarnings {
    pub referrer_id: Uuid,
    pub pending: usize,
    pub completed: usize,
    pub expired: usize,
    pub completed_value: Decimal,
    pub total_commission: Decimal,
}
