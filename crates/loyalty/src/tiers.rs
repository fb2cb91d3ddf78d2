//! Ordered tier threshold table.

use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::loyalty::LoyaltyTier;

/// Tiers sorted by strictly increasing `required_points`, starting at 0.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: Vec<LoyaltyTier>,
}

impl TierCatalog {
    /// Validate and build a catalog. Levels are renumbered by position.
    pub fn new(mut tiers: Vec<LoyaltyTier>) -> LoyaltyResult<Self> {
        if tiers.is_empty() {
            return Err(LoyaltyError::Config("tier catalog is empty".into()));
        }
        tiers.sort_by_key(|t| t.required_points);

        if tiers[0].required_points != 0 {
            return Err(LoyaltyError::Config(format!(
                "entry tier {} must require 0 points, found {}",
                tiers[0].name, tiers[0].required_points
            )));
        }
        if let Some(pair) = tiers
            .windows(2)
            .find(|w| w[0].required_points == w[1].required_points)
        {
            return Err(LoyaltyError::Config(format!(
                "tiers {} and {} share threshold {}",
                pair[0].name, pair[1].name, pair[1].required_points
            )));
        }

        for (level, tier) in tiers.iter_mut().enumerate() {
            tier.level = level as u32;
        }
        Ok(Self { tiers })
    }

    /// Highest tier whose threshold is at or below `points`.
    pub fn tier_for(&self, points: i64) -> &LoyaltyTier {
        let idx = self
            .tiers
            .partition_point(|t| t.required_points <= points)
            .saturating_sub(1);
        &self.tiers[idx]
    }

    pub fn get(&self, level: u32) -> Option<&LoyaltyTier> {
        self.tiers.get(level as usize)
    }

    pub fn next_tier(&self, level: u32) -> Option<&LoyaltyTier> {
        self.tiers.get(level as usize + 1)
    }

    /// Points still needed to reach the tier after `level`, if any.
    pub fn points_to_next(&self, level: u32, lifetime_points: i64) -> Option<i64> {
        self.next_tier(level)
            .map(|next| (next.required_points - lifetime_points).max(0))
    }

    pub fn tiers(&self) -> &[LoyaltyTier] {
        &self.tiers
    }
}
