//! Storefront engine: routes signup, purchase-confirmation and refund
//! events into the points ledger and referral tracker.
//!
//! Order events arrive at-least-once; each `event_id` is applied once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use storefront_core::config::AppConfig;
use storefront_core::customer::CustomerDirectory;
use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::event_bus::EventSink;
use storefront_core::events::{OrderEvent, PurchaseConfirmed, RefundIssued};
use storefront_core::loyalty::{EarnOutcome, LoyaltyAccount, LoyaltyTransaction};
use storefront_core::referral::{QualifyingPurchase, Referral};
use storefront_loyalty::{PointsLedger, RewardCatalog, TierCatalog};
use storefront_promotions::PromotionSelector;
use storefront_referral::{CommissionCalculator, ReferralEngine};

#[derive(Debug, Clone, Serialize)]
pub struct SignupOutcome {
    pub account: LoyaltyAccount,
    pub referral: Option<Referral>,
    pub bonus: Option<EarnOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// The event id was already applied.
    Duplicate,
    Applied {
        account_id: Uuid,
        earned: Option<EarnOutcome>,
        referral: Option<Referral>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Duplicate,
    Applied {
        reversed: Option<LoyaltyTransaction>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventOutcome {
    Purchase(PurchaseOutcome),
    Refund(RefundOutcome),
}

#[derive(Clone)]
pub struct StorefrontEngine {
    config: AppConfig,
    directory: Arc<dyn CustomerDirectory>,
    ledger: PointsLedger,
    rewards: RewardCatalog,
    referrals: ReferralEngine,
    promotions: PromotionSelector,
    processed_events: Arc<DashMap<String, DateTime<Utc>>>,
    signup_bonuses: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl std::fmt::Debug for StorefrontEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontEngine")
            .field("node_id", &self.config.node_id)
            .field("accounts", &self.ledger.len())
            .field("processed_events", &self.processed_events.len())
            .finish()
    }
}

impl StorefrontEngine {
    /// Build every component from configuration. Invalid tier or
    /// commission tables fail here rather than at first use.
    pub fn new(
        config: AppConfig,
        directory: Arc<dyn CustomerDirectory>,
        sink: Arc<dyn EventSink>,
    ) -> LoyaltyResult<Self> {
        let tiers = TierCatalog::new(config.loyalty.tiers.clone())?;
        let ledger = PointsLedger::new(tiers).with_event_sink(sink.clone());
        let rewards = RewardCatalog::new(ledger.clone()).with_event_sink(sink.clone());
        for reward in &config.loyalty.rewards {
            rewards.add_reward(reward.clone())?;
        }

        let calculator = CommissionCalculator::new(&config.commission)?;
        let referrals = ReferralEngine::new(&config.referral, directory.clone(), calculator)
            .with_event_sink(sink);
        let promotions = PromotionSelector::from_config(&config.promotions);

        info!(node_id = %config.node_id, "Storefront engine initialized");
        Ok(Self {
            config,
            directory,
            ledger,
            rewards,
            referrals,
            promotions,
            processed_events: Arc::new(DashMap::new()),
            signup_bonuses: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub fn rewards(&self) -> &RewardCatalog {
        &self.rewards
    }

    pub fn referrals(&self) -> &ReferralEngine {
        &self.referrals
    }

    pub fn promotions(&self) -> &PromotionSelector {
        &self.promotions
    }

    /// Points a purchase of `amount` is worth, rounded down.
    pub fn points_for(&self, amount: Decimal) -> i64 {
        (amount * self.config.loyalty.points_per_currency_unit)
            .floor()
            .to_i64()
            .unwrap_or(0)
            .max(0)
    }

    /// Open the customer's account, optionally attributing a referral code.
    ///
    /// An invalid code fails the signup before anything is stored. A code is
    /// only honored for a customer with no loyalty account yet.
    pub fn signup(
        &self,
        customer_id: Uuid,
        referral_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<SignupOutcome> {
        if self.directory.get_customer(customer_id).is_none() {
            return Err(LoyaltyError::CustomerNotFound(customer_id));
        }
        if referral_code.is_some() && self.ledger.account_for_customer(customer_id).is_some() {
            warn!(customer_id = %customer_id, "Referral code on existing customer rejected");
            return Err(LoyaltyError::InvalidReferral(
                "referral codes apply to new customers only".into(),
            ));
        }
        let referral = referral_code
            .map(|code| self.referrals.create(customer_id, code, now))
            .transpose()?;
        let account = self.ledger.open_account(customer_id, now)?;

        let bonus_points = self.config.loyalty.signup_bonus_points;
        let bonus = if bonus_points > 0 && self.claim_signup_bonus(customer_id, now) {
            Some(self.ledger.earn(account.id, bonus_points, "Signup bonus")?)
        } else {
            None
        };

        info!(
            customer_id = %customer_id,
            account_id = %account.id,
            referred = referral.is_some(),
            "Customer signed up"
        );
        Ok(SignupOutcome {
            account,
            referral,
            bonus,
        })
    }

    pub fn handle(&self, event: &OrderEvent, now: DateTime<Utc>) -> LoyaltyResult<EventOutcome> {
        match event {
            OrderEvent::PurchaseConfirmed(p) => self.handle_purchase(p, now).map(EventOutcome::Purchase),
            OrderEvent::RefundIssued(r) => self.handle_refund(r, now).map(EventOutcome::Refund),
        }
    }

    /// Credit points for a confirmed purchase and complete the buyer's
    /// pending referral, once per `event_id`.
    pub fn handle_purchase(
        &self,
        event: &PurchaseConfirmed,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<PurchaseOutcome> {
        if !self.claim(event.event_id.clone(), now) {
            debug!(event_id = %event.event_id, "Duplicate purchase confirmation ignored");
            metrics::counter!("engine.duplicate_events").increment(1);
            return Ok(PurchaseOutcome::Duplicate);
        }

        // Referral first: a fatal commission error must leave no points behind
        // so the released event can be retried cleanly.
        let referral = match self.complete_referral(event, now) {
            Ok(referral) => referral,
            Err(e) => {
                self.release(&event.event_id);
                return Err(e);
            }
        };

        let account = match self.ledger.open_account(event.customer_id, now) {
            Ok(account) => account,
            Err(e) => {
                self.release(&event.event_id);
                return Err(e);
            }
        };
        let points = self.points_for(event.amount);
        let earned = if points > 0 {
            let description = format!("Purchase {} ({})", event.product_id, event.event_id);
            match self.ledger.earn(account.id, points, description) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    self.release(&event.event_id);
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            event_id = %event.event_id,
            customer_id = %event.customer_id,
            amount = %event.amount,
            points,
            referral_completed = referral.is_some(),
            "Purchase applied"
        );
        Ok(PurchaseOutcome::Applied {
            account_id: account.id,
            earned,
            referral,
        })
    }

    /// Reverse the points a refunded amount earned, once per `event_id`.
    pub fn handle_refund(
        &self,
        event: &RefundIssued,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<RefundOutcome> {
        if !self.claim(event.event_id.clone(), now) {
            debug!(event_id = %event.event_id, "Duplicate refund ignored");
            metrics::counter!("engine.duplicate_events").increment(1);
            return Ok(RefundOutcome::Duplicate);
        }

        let Some(account) = self.ledger.account_for_customer(event.customer_id) else {
            warn!(customer_id = %event.customer_id, "Refund for customer without loyalty account");
            return Ok(RefundOutcome::Applied { reversed: None });
        };
        let points = self.points_for(event.amount);
        if points == 0 {
            return Ok(RefundOutcome::Applied { reversed: None });
        }

        let reversed = self
            .ledger
            .refund(account.id, points, format!("Refund ({})", event.event_id))
            .map_err(|e| {
                self.release(&event.event_id);
                e
            })?;
        Ok(RefundOutcome::Applied { reversed })
    }

    /// Sweep pending referrals whose window has elapsed.
    pub fn expire_referrals(&self, now: DateTime<Utc>) -> Vec<Referral> {
        self.referrals.expire_stale(now)
    }

    pub fn is_processed(&self, event_id: &str) -> bool {
        self.processed_events.contains_key(event_id)
    }

    fn complete_referral(
        &self,
        event: &PurchaseConfirmed,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Option<Referral>> {
        let Some(pending) = self.referrals.pending_for_referred(event.customer_id) else {
            return Ok(None);
        };
        let purchase = QualifyingPurchase {
            product_id: event.product_id.clone(),
            amount: event.amount,
            event_id: event.event_id.clone(),
        };
        if !self.referrals.qualifies(&purchase) {
            debug!(referral_id = %pending.id, amount = %event.amount, "Purchase does not qualify referral");
            return Ok(None);
        }

        match self.referrals.complete(pending.id, &purchase, now) {
            Ok(referral) => Ok(Some(referral)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(referral_id = %pending.id, error = %e, "Referral not completed");
                Ok(None)
            }
        }
    }

    /// Atomically mark `key` as processed. `false` if it already was.
    fn claim(&self, key: String, now: DateTime<Utc>) -> bool {
        match self.processed_events.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    fn claim_signup_bonus(&self, customer_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.signup_bonuses.entry(customer_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    fn release(&self, key: &str) {
        self.processed_events.remove(key);
    }
}
