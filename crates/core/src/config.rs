use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::loyalty::{LoyaltyReward, LoyaltyTier};
use crate::promotion::Promotion;
use crate::referral::{CommissionTier, ProductCommission};

/// Root application configuration. Loaded from environment variables
/// with the prefix `STOREFRONT__` and an optional TOML/JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub loyalty: LoyaltyConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub commission: CommissionConfig,
    #[serde(default)]
    pub promotions: PromotionConfig,
}

fn default_node_id() -> String {
    "storefront-01".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            loyalty: LoyaltyConfig::default(),
            referral: ReferralConfig::default(),
            commission: CommissionConfig::default(),
            promotions: PromotionConfig::default(),
        }
    }
}

// ─── Loyalty Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<LoyaltyTier>,
    /// Points credited per whole currency unit of a confirmed purchase.
    #[serde(default = "default_points_per_currency_unit")]
    pub points_per_currency_unit: Decimal,
    /// Points credited when an account is opened at signup. 0 disables.
    #[serde(default)]
    pub signup_bonus_points: i64,
    #[serde(default)]
    pub rewards: Vec<LoyaltyReward>,
}

fn default_tiers() -> Vec<LoyaltyTier> {
    [("bronze", 0), ("silver", 1000), ("gold", 2000)]
        .into_iter()
        .enumerate()
        .map(|(level, (name, required_points))| LoyaltyTier {
            level: level as u32,
            name: name.to_string(),
            required_points,
            benefits: Vec::new(),
        })
        .collect()
}
fn default_points_per_currency_unit() -> Decimal {
    Decimal::ONE
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            points_per_currency_unit: default_points_per_currency_unit(),
            signup_bonus_points: 0,
            rewards: Vec::new(),
        }
    }
}

// ─── Referral Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ReferralConfig {
    /// Days a pending referral waits for a qualifying purchase.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
    /// Minimum purchase amount that completes a referral.
    #[serde(default)]
    pub min_qualifying_amount: Decimal,
}

fn default_expiry_days() -> i64 { 30 }

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
            min_qualifying_amount: Decimal::ZERO,
        }
    }
}

// ─── Commission Config ──────────────────────────────────────────────────────

/// Rounding applied when converting a commission to the currency's minor unit.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfEven,
    Down,
}

impl RoundingMode {
    pub fn strategy(&self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::Down => RoundingStrategy::ToZero,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommissionConfig {
    #[serde(default = "default_commission_tiers")]
    pub tiers: Vec<CommissionTier>,
    #[serde(default)]
    pub product_overrides: Vec<ProductCommission>,
    /// Digits after the decimal point for the payout currency.
    #[serde(default = "default_minor_units")]
    pub currency_minor_units: u32,
    #[serde(default)]
    pub rounding: RoundingMode,
}

fn default_commission_tiers() -> Vec<CommissionTier> {
    vec![
        CommissionTier {
            min_referral_value: Decimal::ZERO,
            base_commission_rate: Decimal::new(5, 2),
        },
        CommissionTier {
            min_referral_value: Decimal::new(1000, 0),
            base_commission_rate: Decimal::new(75, 3),
        },
        CommissionTier {
            min_referral_value: Decimal::new(5000, 0),
            base_commission_rate: Decimal::new(10, 2),
        },
    ]
}
fn default_minor_units() -> u32 { 2 }

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            tiers: default_commission_tiers(),
            product_overrides: Vec::new(),
            currency_minor_units: default_minor_units(),
            rounding: RoundingMode::default(),
        }
    }
}

// ─── Promotion Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromotionConfig {
    #[serde(default)]
    pub catalog: Vec<Promotion>,
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    ///
    /// A `path` that is given must exist. Environment values are scalars;
    /// tables such as tiers and the promotion catalog come from the file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("STOREFRONT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.loyalty.tiers.len(), 3);
        assert_eq!(config.loyalty.tiers[1].name, "silver");
        assert_eq!(config.loyalty.tiers[1].required_points, 1000);
        assert_eq!(config.referral.expiry_days, 30);
        assert_eq!(config.commission.currency_minor_units, 2);
        assert_eq!(config.commission.rounding, RoundingMode::HalfUp);
    }

    #[test]
    fn test_rounding_strategy_half_up() {
        let value = Decimal::new(12345, 3); // 12.345
        let rounded = value.round_dp_with_strategy(2, RoundingMode::HalfUp.strategy());
        assert_eq!(rounded, Decimal::new(1235, 2));
        let even = value.round_dp_with_strategy(2, RoundingMode::HalfEven.strategy());
        assert_eq!(even, Decimal::new(1234, 2));
    }

    #[test]
    fn test_deserialize_partial_section() {
        let json = r#"{ "referral": { "expiry_days": 14 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.referral.expiry_days, 14);
        assert_eq!(config.node_id, "storefront-01");
        assert_eq!(config.commission.tiers.len(), 3);
    }

    #[test]
    fn test_load_file_with_env_override() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/storefront.toml");
        std::env::set_var("STOREFRONT__NODE_ID", "edge-7");
        let loaded = AppConfig::load(Some(path));
        std::env::remove_var("STOREFRONT__NODE_ID");

        let config = loaded.unwrap();
        assert_eq!(config.node_id, "edge-7");
        assert_eq!(config.loyalty.signup_bonus_points, 50);
        assert_eq!(config.loyalty.tiers[1].name, "silver");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/storefront.toml")).is_err());
    }
}
