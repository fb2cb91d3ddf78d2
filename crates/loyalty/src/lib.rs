//! Loyalty points engine: tier catalog, append-only points ledger, and
//! reward redemption. Data is held in DashMap (development); swap to a
//! durable store for production.

pub mod ledger;
pub mod rewards;
pub mod tiers;

pub use ledger::PointsLedger;
pub use rewards::RewardCatalog;
pub use tiers::TierCatalog;
