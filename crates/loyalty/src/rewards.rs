//! Reward catalog and point-for-reward redemption.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::event_bus::{EventSink, LoyaltyEvent};
use storefront_core::loyalty::{LoyaltyReward, PurchaseContext, RedemptionResult, RewardCode};

use crate::ledger::PointsLedger;

const CODE_LEN: usize = 10;

/// Validates and executes point-for-reward exchanges against a ledger.
#[derive(Clone)]
pub struct RewardCatalog {
    ledger: PointsLedger,
    rewards: Arc<DashMap<Uuid, LoyaltyReward>>,
    codes: Arc<DashMap<String, RewardCode>>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RewardCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardCatalog")
            .field("rewards", &self.rewards.len())
            .field("codes", &self.codes.len())
            .finish()
    }
}

impl RewardCatalog {
    pub fn new(ledger: PointsLedger) -> Self {
        Self {
            ledger,
            rewards: Arc::new(DashMap::new()),
            codes: Arc::new(DashMap::new()),
            event_sink: storefront_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for reward fulfillment requests.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn add_reward(&self, reward: LoyaltyReward) -> LoyaltyResult<Uuid> {
        if reward.points_cost <= 0 {
            return Err(LoyaltyError::InvalidAmount(reward.points_cost));
        }
        let id = reward.id;
        info!(reward_id = %id, name = %reward.name, cost = reward.points_cost, "Reward added");
        self.rewards.insert(id, reward);
        Ok(id)
    }

    pub fn get_reward(&self, reward_id: Uuid) -> Option<LoyaltyReward> {
        self.rewards.get(&reward_id).map(|r| r.clone())
    }

    /// Rewards the account could redeem right now, cheapest first.
    pub fn available_rewards(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Vec<LoyaltyReward>> {
        let available = self.ledger.balance(account_id)?.available;
        let mut rewards: Vec<_> = self
            .rewards
            .iter()
            .filter(|r| r.is_redeemable(now) && r.points_cost <= available)
            .map(|r| r.value().clone())
            .collect();
        rewards.sort_by(|a, b| a.points_cost.cmp(&b.points_cost).then(a.id.cmp(&b.id)));
        Ok(rewards)
    }

    /// Exchange points for a single-use reward code.
    ///
    /// All validation runs before the ledger debit; code issuance after the
    /// debit cannot fail, so a failed call leaves no trace.
    pub fn redeem(
        &self,
        account_id: Uuid,
        reward_id: Uuid,
        purchase: &PurchaseContext,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<RedemptionResult> {
        let reward = self
            .get_reward(reward_id)
            .ok_or(LoyaltyError::RewardNotFound(reward_id))?;
        if !reward.is_active {
            return Err(LoyaltyError::RewardInactive(reward_id));
        }
        if reward.is_expired(now) {
            return Err(LoyaltyError::RewardExpired(reward_id));
        }
        if let Some(required) = reward.min_purchase_amount {
            if purchase.amount < required {
                warn!(
                    account_id = %account_id,
                    reward_id = %reward_id,
                    %required,
                    actual = %purchase.amount,
                    "Minimum purchase not met"
                );
                return Err(LoyaltyError::MinimumPurchaseNotMet {
                    required,
                    actual: purchase.amount,
                });
            }
        }

        let transaction = self.ledger.redeem(
            account_id,
            reward.points_cost,
            format!("Redeemed {}", reward.name),
        )?;

        let code = self.issue_code(&reward, account_id, now);
        let balance = self.ledger.balance(account_id)?;

        metrics::counter!("loyalty.redemptions").increment(1);
        info!(
            account_id = %account_id,
            reward_id = %reward_id,
            cost = reward.points_cost,
            available = balance.available,
            "Reward redeemed"
        );
        self.event_sink.emit(LoyaltyEvent::RewardIssued(code.clone()));

        Ok(RedemptionResult {
            code,
            transaction,
            balance,
        })
    }

    pub fn code(&self, code: &str) -> Option<RewardCode> {
        self.codes.get(code).map(|c| c.clone())
    }

    pub fn codes_for_account(&self, account_id: Uuid) -> Vec<RewardCode> {
        let mut codes: Vec<_> = self
            .codes
            .iter()
            .filter(|c| c.account_id == account_id)
            .map(|c| c.value().clone())
            .collect();
        codes.sort_by_key(|c| c.issued_at);
        codes
    }

    fn issue_code(&self, reward: &LoyaltyReward, account_id: Uuid, now: DateTime<Utc>) -> RewardCode {
        let mut rng = rand::thread_rng();
        loop {
            let suffix: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(CODE_LEN)
                .map(|b| char::from(b).to_ascii_uppercase())
                .collect();
            let code = format!("RWD-{suffix}");
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                let issued = RewardCode {
                    code,
                    reward_id: reward.id,
                    account_id,
                    issued_at: now,
                    terms: reward.terms.clone(),
                };
                slot.insert(issued.clone());
                return issued;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use storefront_core::config::LoyaltyConfig;
    use storefront_core::event_bus::{capture_sink, LoyaltyEventType};
    use storefront_core::loyalty::RewardTerms;

    use crate::tiers::TierCatalog;

    fn setup(points: i64) -> (RewardCatalog, PointsLedger, Uuid) {
        let ledger = PointsLedger::new(TierCatalog::new(LoyaltyConfig::default().tiers).unwrap());
        let account = ledger.open_account(Uuid::new_v4(), Utc::now()).unwrap();
        if points > 0 {
            ledger.earn(account.id, points, "seed").unwrap();
        }
        (RewardCatalog::new(ledger.clone()), ledger, account.id)
    }

    fn reward(cost: i64) -> LoyaltyReward {
        LoyaltyReward {
            id: Uuid::new_v4(),
            name: "$10 off".into(),
            points_cost: cost,
            terms: RewardTerms::AmountOff {
                amount: Decimal::new(10, 0),
            },
            valid_until: None,
            min_purchase_amount: None,
            is_active: true,
        }
    }

    fn cart(amount: i64) -> PurchaseContext {
        PurchaseContext {
            amount: Decimal::new(amount, 0),
        }
    }

    #[test]
    fn test_redeem_twice_with_exact_balance() {
        let sink = capture_sink();
        let (catalog, ledger, account) = setup(800);
        let catalog = catalog.with_event_sink(sink.clone());
        let id = catalog.add_reward(reward(800)).unwrap();

        let result = catalog.redeem(account, id, &cart(50), Utc::now()).unwrap();
        assert!(result.code.code.starts_with("RWD-"));
        assert_eq!(result.code.account_id, account);
        assert_eq!(result.balance.available, 0);
        assert_eq!(result.transaction.points, -800);

        let err = catalog.redeem(account, id, &cart(50), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LoyaltyError::InsufficientBalance {
                requested: 800,
                available: 0
            }
        );
        assert_eq!(ledger.transactions(account).unwrap().len(), 2);
        assert_eq!(catalog.codes_for_account(account).len(), 1);
        assert_eq!(sink.count_type(LoyaltyEventType::RewardIssued), 1);
    }

    #[test]
    fn test_redeem_validation_order() {
        let (catalog, ledger, account) = setup(1000);
        let now = Utc::now();

        let missing = Uuid::new_v4();
        assert_eq!(
            catalog.redeem(account, missing, &cart(10), now).unwrap_err(),
            LoyaltyError::RewardNotFound(missing)
        );

        let mut inactive = reward(100);
        inactive.is_active = false;
        let inactive_id = catalog.add_reward(inactive).unwrap();
        assert_eq!(
            catalog.redeem(account, inactive_id, &cart(10), now).unwrap_err(),
            LoyaltyError::RewardInactive(inactive_id)
        );

        let mut expired = reward(100);
        expired.valid_until = Some(now - Duration::days(1));
        let expired_id = catalog.add_reward(expired).unwrap();
        assert_eq!(
            catalog.redeem(account, expired_id, &cart(10), now).unwrap_err(),
            LoyaltyError::RewardExpired(expired_id)
        );

        let mut minimum = reward(100);
        minimum.min_purchase_amount = Some(Decimal::new(75, 0));
        let minimum_id = catalog.add_reward(minimum).unwrap();
        assert_eq!(
            catalog.redeem(account, minimum_id, &cart(50), now).unwrap_err(),
            LoyaltyError::MinimumPurchaseNotMet {
                required: Decimal::new(75, 0),
                actual: Decimal::new(50, 0),
            }
        );

        assert_eq!(ledger.transactions(account).unwrap().len(), 1);
        assert!(catalog.codes_for_account(account).is_empty());

        assert!(catalog.redeem(account, minimum_id, &cart(75), now).is_ok());
    }

    #[test]
    fn test_valid_until_is_inclusive() {
        let (catalog, _, account) = setup(500);
        let now = Utc::now();
        let mut r = reward(100);
        r.valid_until = Some(now);
        let id = catalog.add_reward(r).unwrap();
        assert!(catalog.redeem(account, id, &cart(1), now).is_ok());
    }

    #[test]
    fn test_available_rewards_filters_and_sorts() {
        let (catalog, _, account) = setup(300);
        catalog.add_reward(reward(250)).unwrap();
        catalog.add_reward(reward(100)).unwrap();
        catalog.add_reward(reward(400)).unwrap();
        let mut off = reward(50);
        off.is_active = false;
        catalog.add_reward(off).unwrap();

        let costs: Vec<_> = catalog
            .available_rewards(account, Utc::now())
            .unwrap()
            .iter()
            .map(|r| r.points_cost)
            .collect();
        assert_eq!(costs, [100, 250]);
    }

    #[test]
    fn test_rejects_zero_cost_reward() {
        let (catalog, _, _) = setup(0);
        assert!(catalog.add_reward(reward(0)).is_err());
    }
}
