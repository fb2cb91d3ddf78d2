//! Commission rate resolution: product overrides first, then the referrer's
//! value tier.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use storefront_core::config::{CommissionConfig, RoundingMode};
use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::referral::{CommissionTier, ProductCommission};

/// Where a computed commission's rate came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CommissionSource {
    ProductFlat { product_id: String },
    ProductRate { product_id: String, rate: Decimal },
    Tier { min_referral_value: Decimal, rate: Decimal },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionQuote {
    pub amount: Decimal,
    pub source: CommissionSource,
}

#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    /// Ascending by `min_referral_value`.
    tiers: Vec<CommissionTier>,
    overrides: Arc<DashMap<String, ProductCommission>>,
    minor_units: u32,
    rounding: RoundingMode,
}

impl CommissionCalculator {
    /// Build from configuration. An empty tier list is accepted here and
    /// surfaces as `NoApplicableTier` when a tier rate is needed.
    pub fn new(config: &CommissionConfig) -> LoyaltyResult<Self> {
        let mut tiers = config.tiers.clone();
        for tier in &tiers {
            check_rate(tier.base_commission_rate)?;
        }
        tiers.sort_by(|a, b| a.min_referral_value.cmp(&b.min_referral_value));

        let calculator = Self {
            tiers,
            overrides: Arc::new(DashMap::new()),
            minor_units: config.currency_minor_units,
            rounding: config.rounding,
        };
        for product in &config.product_overrides {
            calculator.set_product_commission(product.clone())?;
        }
        info!(
            tiers = calculator.tiers.len(),
            overrides = calculator.overrides.len(),
            minor_units = calculator.minor_units,
            "Commission calculator initialized"
        );
        Ok(calculator)
    }

    pub fn set_product_commission(&self, product: ProductCommission) -> LoyaltyResult<()> {
        check_rate(product.commission_rate)?;
        if product.flat_commission.is_some_and(|f| f < Decimal::ZERO) {
            return Err(LoyaltyError::Config(format!(
                "negative flat commission for product {}",
                product.product_id
            )));
        }
        self.overrides.insert(product.product_id.clone(), product);
        Ok(())
    }

    /// Active override for `product_id`, if any.
    pub fn product_override(&self, product_id: &str) -> Option<ProductCommission> {
        self.overrides
            .get(product_id)
            .filter(|p| p.is_active)
            .map(|p| p.clone())
    }

    /// Highest tier whose minimum is at or below `cumulative_value`.
    pub fn tier_for(&self, cumulative_value: Decimal) -> LoyaltyResult<&CommissionTier> {
        if self.tiers.is_empty() {
            return Err(LoyaltyError::NoApplicableTier);
        }
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_referral_value <= cumulative_value)
            .ok_or(LoyaltyError::NoApplicableTier)
    }

    /// Commission owed on `purchase_amount` for `product_id`.
    ///
    /// `cumulative_value` is the referrer's completed-referral value including
    /// this purchase; it is only read when no product override applies.
    pub fn compute(
        &self,
        product_id: &str,
        purchase_amount: Decimal,
        cumulative_value: Decimal,
    ) -> LoyaltyResult<CommissionQuote> {
        let (raw, source) = match self.product_override(product_id) {
            Some(ProductCommission {
                flat_commission: Some(flat),
                ..
            }) => (
                flat,
                CommissionSource::ProductFlat {
                    product_id: product_id.to_string(),
                },
            ),
            Some(product) => (
                product.commission_rate * purchase_amount,
                CommissionSource::ProductRate {
                    product_id: product_id.to_string(),
                    rate: product.commission_rate,
                },
            ),
            None => {
                let tier = self.tier_for(cumulative_value)?;
                (
                    tier.base_commission_rate * purchase_amount,
                    CommissionSource::Tier {
                        min_referral_value: tier.min_referral_value,
                        rate: tier.base_commission_rate,
                    },
                )
            }
        };

        let amount = self.round(raw);
        debug!(product_id, %purchase_amount, %cumulative_value, %amount, ?source, "Commission computed");
        Ok(CommissionQuote { amount, source })
    }

    /// Round to the currency's minor unit with the configured mode.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units, self.rounding.strategy())
    }
}

fn check_rate(rate: Decimal) -> LoyaltyResult<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(LoyaltyError::Config(format!(
            "commission rate {rate} outside [0, 1]"
        )));
    }
    Ok(())
}
