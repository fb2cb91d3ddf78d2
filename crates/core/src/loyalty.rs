//! Loyalty program domain types: point accounts, the append-only ledger,
//! tier thresholds, and the reward catalog.
//!
//! - Tiers are an ordered threshold table over lifetime points
//! - Every balance change is a `LoyaltyTransaction`; balances are derived
//! - Rewards exchange points for a single-use code with discount/cashback terms

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Tier System ────────────────────────────────────────────────────────────

/// A named threshold of cumulative lifetime points conferring benefits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoyaltyTier {
    /// Position in the catalog; level 0 is the entry tier.
    pub level: u32,
    pub name: String,
    pub required_points: i64,
    #[serde(default)]
    pub benefits: Vec<String>,
}

// ─── Accounts & Ledger ──────────────────────────────────────────────────────

/// Loyalty membership for a single customer (1:1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyAccount {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Highest tier level reached. Never decreases.
    pub level: u32,
    pub joined_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
    Redeemed,
}

/// A single immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub date: DateTime<Utc>,
    /// Signed magnitude: redemptions are negative, earnings positive.
    /// Refund reversals are earned entries with negative points.
    pub points: i64,
    pub transaction_type: TransactionType,
    pub description: String,
}

/// Derived point totals for an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PointsBalance {
    /// Lifetime earned points, net of refund reversals.
    pub total: i64,
    /// Spendable points: earned minus redeemed.
    pub available: i64,
}

impl PointsBalance {
    /// Fold a transaction history into totals.
    pub fn from_transactions<'a>(txs: impl IntoIterator<Item = &'a LoyaltyTransaction>) -> Self {
        txs.into_iter().fold(Self::default(), |mut acc, tx| {
            if tx.transaction_type == TransactionType::Earned {
                acc.total += tx.points;
            }
            acc.available += tx.points;
            acc
        })
    }
}

/// Result of an `earn` call: the appended entry plus any tier upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarnOutcome {
    pub transaction: LoyaltyTransaction,
    pub balance: PointsBalance,
    pub level: u32,
    pub tier_change: Option<TierChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierChange {
    pub account_id: Uuid,
    pub from_level: u32,
    pub to_level: u32,
    pub tier_name: String,
}

// ─── Rewards ────────────────────────────────────────────────────────────────

/// What a redeemed reward grants at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardTerms {
    /// Percentage off the order, 0–100.
    PercentOff { percent: Decimal },
    /// Fixed amount off the order.
    AmountOff { amount: Decimal },
    /// Credit returned after purchase.
    Cashback { amount: Decimal },
    FreeProduct { product_id: String },
    FreeShipping,
}

/// Catalog entry exchangeable for points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyReward {
    pub id: Uuid,
    pub name: String,
    pub points_cost: i64,
    pub terms: RewardTerms,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_purchase_amount: Option<Decimal>,
    pub is_active: bool,
}

impl LoyaltyReward {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|v| now > v).unwrap_or(false)
    }

    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Checkout context a redemption is evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseContext {
    pub amount: Decimal,
}

/// Single-use code bound to the redeeming account. Checkout consumes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardCode {
    pub code: String,
    pub reward_id: Uuid,
    pub account_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub terms: RewardTerms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionResult {
    pub code: RewardCode,
    pub transaction: LoyaltyTransaction,
    pub balance: PointsBalance,
}
