//! Referral tracking: creation from a referral code, completion on a
//! confirmed purchase (with commission), and window-based expiry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use storefront_core::config::ReferralConfig;
use storefront_core::customer::CustomerDirectory;
use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::event_bus::{EventSink, LoyaltyEvent};
use storefront_core::referral::{QualifyingPurchase, Referral, ReferralEarnings, ReferralStatus};

use crate::commission::{CommissionCalculator, CommissionQuote};
use crate::state_machine::ReferralStateMachine;

/// Owns every referral and is the only writer of referral state.
#[derive(Clone)]
pub struct ReferralEngine {
    config: ReferralConfig,
    directory: Arc<dyn CustomerDirectory>,
    calculator: Arc<CommissionCalculator>,
    state_machine: ReferralStateMachine,
    referrals: Arc<DashMap<Uuid, Referral>>,
    /// Referred customer → their referral. A customer is referred at most once.
    by_referred: Arc<DashMap<Uuid, Uuid>>,
    /// Referrer → cumulative purchase value of completed referrals.
    completed_value: Arc<DashMap<Uuid, Decimal>>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ReferralEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferralEngine")
            .field("referrals", &self.referrals.len())
            .field("expiry_days", &self.config.expiry_days)
            .finish()
    }
}

impl ReferralEngine {
    pub fn new(
        config: &ReferralConfig,
        directory: Arc<dyn CustomerDirectory>,
        calculator: CommissionCalculator,
    ) -> Self {
        info!(expiry_days = config.expiry_days, "Referral engine initialized");
        Self {
            config: config.clone(),
            directory,
            calculator: Arc::new(calculator),
            state_machine: ReferralStateMachine::new(),
            referrals: Arc::new(DashMap::new()),
            by_referred: Arc::new(DashMap::new()),
            completed_value: Arc::new(DashMap::new()),
            event_sink: storefront_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for commission and expiry notifications.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn calculator(&self) -> &CommissionCalculator {
        &self.calculator
    }

    /// Start tracking a referral for `referred_customer_id` via `code`.
    ///
    /// Nothing is stored unless every check passes.
    pub fn create(
        &self,
        referred_customer_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Referral> {
        let referred = self
            .directory
            .get_customer(referred_customer_id)
            .ok_or_else(|| LoyaltyError::InvalidReferral("unknown referred customer".into()))?;
        let referrer = self
            .directory
            .find_by_referral_code(code)
            .ok_or_else(|| LoyaltyError::InvalidReferral(format!("unknown referral code {code}")))?;

        if referrer.id == referred.id {
            warn!(customer_id = %referred.id, "Self-referral rejected");
            return Err(LoyaltyError::InvalidReferral("self-referral".into()));
        }
        if referred.referred_by.is_some_and(|by| by != referrer.id) {
            return Err(LoyaltyError::InvalidReferral(
                "customer was referred by someone else".into(),
            ));
        }

        let referral = match self.by_referred.entry(referred.id) {
            Entry::Occupied(_) => {
                return Err(LoyaltyError::InvalidReferral(
                    "customer already has a referral".into(),
                ))
            }
            Entry::Vacant(slot) => {
                let referral = Referral {
                    id: Uuid::new_v4(),
                    referrer_id: referrer.id,
                    referred_customer_id: referred.id,
                    status: ReferralStatus::Pending,
                    created_at: now,
                    completed_at: None,
                    purchase_amount: None,
                    product_id: None,
                    commission_earned: None,
                    event_id: None,
                };
                self.referrals.insert(referral.id, referral.clone());
                slot.insert(referral.id);
                referral
            }
        };

        metrics::counter!("referral.created").increment(1);
        info!(
            referral_id = %referral.id,
            referrer_id = %referral.referrer_id,
            referred_id = %referral.referred_customer_id,
            "Referral created"
        );
        Ok(referral)
    }

    /// Whether `purchase` is large enough to complete a referral.
    pub fn qualifies(&self, purchase: &QualifyingPurchase) -> bool {
        purchase.amount > Decimal::ZERO && purchase.amount >= self.config.min_qualifying_amount
    }

    /// Complete a pending referral and record its commission.
    ///
    /// Replaying the confirmation that already completed it returns the
    /// stored referral unchanged.
    pub fn complete(
        &self,
        referral_id: Uuid,
        purchase: &QualifyingPurchase,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<Referral> {
        let mut referral = self
            .referrals
            .get_mut(&referral_id)
            .ok_or(LoyaltyError::ReferralNotFound(referral_id))?;

        if referral.status == ReferralStatus::Completed
            && referral.event_id.as_deref() == Some(purchase.event_id.as_str())
        {
            debug!(referral_id = %referral_id, event_id = %purchase.event_id, "Duplicate completion ignored");
            return Ok(referral.clone());
        }

        if referral.status == ReferralStatus::Pending && self.window_elapsed(&referral, now) {
            self.state_machine
                .check(referral.status, ReferralStatus::Expired)?;
            referral.status = ReferralStatus::Expired;
            let expired = referral.clone();
            drop(referral);
            self.on_expired(&expired, now);
            return Err(LoyaltyError::InvalidTransition {
                from: ReferralStatus::Expired,
                to: ReferralStatus::Completed,
            });
        }

        self.state_machine
            .check(referral.status, ReferralStatus::Completed)?;
        if !self.qualifies(purchase) {
            return Err(LoyaltyError::InvalidReferral(format!(
                "purchase of {} does not qualify",
                purchase.amount
            )));
        }

        // Lock order: referral entry, then referrer total.
        let mut total = self
            .completed_value
            .entry(referral.referrer_id)
            .or_insert(Decimal::ZERO);
        let cumulative = *total + purchase.amount;
        let quote = self
            .calculator
            .compute(&purchase.product_id, purchase.amount, cumulative)?;
        *total = cumulative;
        drop(total);

        referral.status = ReferralStatus::Completed;
        referral.completed_at = Some(now);
        referral.purchase_amount = Some(purchase.amount);
        referral.product_id = Some(purchase.product_id.clone());
        referral.commission_earned = Some(quote.amount);
        referral.event_id = Some(purchase.event_id.clone());
        let completed = referral.clone();
        drop(referral);

        metrics::counter!("referral.completed").increment(1);
        info!(
            referral_id = %completed.id,
            referrer_id = %completed.referrer_id,
            amount = %purchase.amount,
            commission = %quote.amount,
            "Referral completed"
        );
        self.event_sink.emit(LoyaltyEvent::CommissionEarned {
            referral_id: completed.id,
            referrer_id: completed.referrer_id,
            amount: quote.amount,
            at: now,
        });
        Ok(completed)
    }

    /// Expire a pending referral regardless of its window.
    pub fn expire(&self, referral_id: Uuid, now: DateTime<Utc>) -> LoyaltyResult<Referral> {
        let mut referral = self
            .referrals
            .get_mut(&referral_id)
            .ok_or(LoyaltyError::ReferralNotFound(referral_id))?;
        self.state_machine
            .check(referral.status, ReferralStatus::Expired)?;
        referral.status = ReferralStatus::Expired;
        let expired = referral.clone();
        drop(referral);

        self.on_expired(&expired, now);
        Ok(expired)
    }

    /// Expire every pending referral whose window has elapsed.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<Referral> {
        let stale: Vec<Uuid> = self
            .referrals
            .iter()
            .filter(|r| r.status == ReferralStatus::Pending && self.window_elapsed(r, now))
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            let Some(mut referral) = self.referrals.get_mut(&id) else {
                continue;
            };
            // Re-check under the write guard; a completion may have won.
            if referral.status != ReferralStatus::Pending {
                continue;
            }
            referral.status = ReferralStatus::Expired;
            let snapshot = referral.clone();
            drop(referral);
            self.on_expired(&snapshot, now);
            expired.push(snapshot);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale referrals");
        }
        expired
    }

    /// Commission `referrer_id` would earn on this purchase right now.
    pub fn compute_commission(
        &self,
        referrer_id: Uuid,
        product_id: &str,
        purchase_amount: Decimal,
    ) -> LoyaltyResult<CommissionQuote> {
        let cumulative = self.completed_value(referrer_id) + purchase_amount;
        self.calculator
            .compute(product_id, purchase_amount, cumulative)
    }

    pub fn get(&self, referral_id: Uuid) -> Option<Referral> {
        self.referrals.get(&referral_id).map(|r| r.clone())
    }

    /// The referral attached to `customer_id`, whatever its state.
    pub fn referral_for_referred(&self, customer_id: Uuid) -> Option<Referral> {
        let id = *self.by_referred.get(&customer_id)?;
        self.get(id)
    }

    pub fn pending_for_referred(&self, customer_id: Uuid) -> Option<Referral> {
        self.referral_for_referred(customer_id)
            .filter(|r| r.status == ReferralStatus::Pending)
    }

    /// All referrals made by `referrer_id`, oldest first.
    pub fn referrals_for_referrer(&self, referrer_id: Uuid) -> Vec<Referral> {
        let mut referrals: Vec<_> = self
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .map(|r| r.value().clone())
            .collect();
        referrals.sort_by_key(|r| r.created_at);
        referrals
    }

    pub fn completed_value(&self, referrer_id: Uuid) -> Decimal {
        self.completed_value
            .get(&referrer_id)
            .map(|v| *v)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn earnings(&self, referrer_id: Uuid) -> ReferralEarnings {
        self.referrals_for_referrer(referrer_id).into_iter().fold(
            ReferralEarnings {
                referrer_id,
                ..Default::default()
            },
            |mut acc, r| {
                match r.status {
                    ReferralStatus::Pending => acc.pending += 1,
                    ReferralStatus::Expired => acc.expired += 1,
                    ReferralStatus::Completed => {
                        acc.completed += 1;
                        acc.completed_value += r.purchase_amount.unwrap_or_default();
                        acc.total_commission += r.commission_earned.unwrap_or_default();
                    }
                }
                acc
            },
        )
    }

    fn window_elapsed(&self, referral: &Referral, now: DateTime<Utc>) -> bool {
        now - referral.created_at >= Duration::days(self.config.expiry_days)
    }

    fn on_expired(&self, referral: &Referral, now: DateTime<Utc>) {
        metrics::counter!("referral.expired").increment(1);
        info!(referral_id = %referral.id, referrer_id = %referral.referrer_id, "Referral expired");
        self.event_sink.emit(LoyaltyEvent::ReferralExpired {
            referral_id: referral.id,
            referrer_id: referral.referrer_id,
            at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use storefront_core::config::CommissionConfig;
    use storefront_core::customer::{Customer, InMemoryCustomerDirectory};
    use storefront_core::event_bus::{capture_sink, LoyaltyEventType};

    struct Fixture {
        engine: ReferralEngine,
        directory: Arc<InMemoryCustomerDirectory>,
        referrer: Uuid,
        friend: Uuid,
        other: Uuid,
    }

    fn fixture() -> Fixture {
        let dir = InMemoryCustomerDirectory::new();
        let referrer = Customer {
            id: Uuid::new_v4(),
            email: "ref@example.com".into(),
            referral_code: Some("REF123".into()),
            referred_by: None,
        };
        let friend = Customer {
            id: Uuid::new_v4(),
            email: "friend@example.com".into(),
            referral_code: None,
            referred_by: None,
        };
        let other = Customer {
            id: Uuid::new_v4(),
            email: "other@example.com".into(),
            referral_code: None,
            referred_by: None,
        };
        let ids = (referrer.id, friend.id, other.id);
        dir.insert(referrer).unwrap();
        dir.insert(friend).unwrap();
        dir.insert(other).unwrap();

        let calc = CommissionCalculator::new(&CommissionConfig::default()).unwrap();
        let dir = Arc::new(dir);
        Fixture {
            engine: ReferralEngine::new(&ReferralConfig::default(), dir.clone(), calc),
            directory: dir,
            referrer: ids.0,
            friend: ids.1,
            other: ids.2,
        }
    }

    fn purchase(event: &str, amount: Decimal) -> QualifyingPurchase {
        QualifyingPurchase {
            product_id: "sku-1".into(),
            amount,
            event_id: event.into(),
        }
    }

    #[test]
    fn test_self_referral_rejected_before_persist() {
        let f = fixture();
        let err = f.engine.create(f.referrer, "REF123", Utc::now()).unwrap_err();
        assert!(matches!(err, LoyaltyError::InvalidReferral(_)));
        assert!(f.engine.referrals_for_referrer(f.referrer).is_empty());
        assert!(f.engine.referral_for_referred(f.referrer).is_none());
    }

    #[test]
    fn test_unknown_code_and_duplicate_referral() {
        let f = fixture();
        assert!(matches!(
            f.engine.create(f.friend, "NOPE", Utc::now()),
            Err(LoyaltyError::InvalidReferral(_))
        ));
        f.engine.create(f.friend, "REF123", Utc::now()).unwrap();
        assert!(matches!(
            f.engine.create(f.friend, "REF123", Utc::now()),
            Err(LoyaltyError::InvalidReferral(_))
        ));
    }

    #[test]
    fn test_code_from_other_referrer_rejected() {
        let f = fixture();
        f.directory.set_referred_by(f.friend, f.other).unwrap();
        assert!(matches!(
            f.engine.create(f.friend, "REF123", Utc::now()),
            Err(LoyaltyError::InvalidReferral(_))
        ));
        assert!(f.engine.referral_for_referred(f.friend).is_none());

        f.directory.set_referred_by(f.friend, f.referrer).unwrap();
        let referral = f.engine.create(f.friend, "REF123", Utc::now()).unwrap();
        assert_eq!(referral.referrer_id, f.referrer);
    }

    #[test]
    fn test_complete_sets_commission() {
        let sink = capture_sink();
        let f = fixture();
        let engine = f.engine.clone().with_event_sink(sink.clone());
        let now = Utc::now();
        let referral = engine.create(f.friend, "REF123", now).unwrap();
        assert!(referral.commission_earned.is_none());

        let done = engine
            .complete(referral.id, &purchase("evt-1", dec!(200)), now)
            .unwrap();
        assert_eq!(done.status, ReferralStatus::Completed);
        assert_eq!(done.commission_earned, Some(dec!(10.00)));
        assert_eq!(done.purchase_amount, Some(dec!(200)));
        assert_eq!(engine.completed_value(f.referrer), dec!(200));
        assert_eq!(sink.count_type(LoyaltyEventType::CommissionEarned), 1);
    }

    #[test]
    fn test_replayed_completion_does_not_double_pay() {
        let f = fixture();
        let now = Utc::now();
        let referral = f.engine.create(f.friend, "REF123", now).unwrap();
        let p = purchase("evt-1", dec!(50));
        f.engine.complete(referral.id, &p, now).unwrap();
        let again = f.engine.complete(referral.id, &p, now).unwrap();
        assert_eq!(again.commission_earned, Some(dec!(2.50)));
        assert_eq!(f.engine.completed_value(f.referrer), dec!(50));

        let err = f
            .engine
            .complete(referral.id, &purchase("evt-2", dec!(50)), now)
            .unwrap_err();
        assert_eq!(
            err,
            LoyaltyError::InvalidTransition {
                from: ReferralStatus::Completed,
                to: ReferralStatus::Completed
            }
        );
    }

    #[test]
    fn test_terminal_states() {
        let f = fixture();
        let now = Utc::now();
        let a = f.engine.create(f.friend, "REF123", now).unwrap();
        let b = f.engine.create(f.other, "REF123", now).unwrap();

        f.engine.complete(a.id, &purchase("evt-a", dec!(10)), now).unwrap();
        f.engine.expire(b.id, now).unwrap();

        assert!(matches!(
            f.engine.expire(a.id, now),
            Err(LoyaltyError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.engine.complete(b.id, &purchase("evt-b", dec!(10)), now),
            Err(LoyaltyError::InvalidTransition { .. })
        ));
        assert_eq!(f.engine.get(a.id).unwrap().status, ReferralStatus::Completed);
        assert_eq!(f.engine.get(b.id).unwrap().status, ReferralStatus::Expired);
        assert!(f.engine.get(b.id).unwrap().commission_earned.is_none());
    }

    #[test]
    fn test_expire_stale_uses_window() {
        let f = fixture();
        let start = Utc::now();
        let old = f.engine.create(f.friend, "REF123", start).unwrap();
        let fresh = f
            .engine
            .create(f.other, "REF123", start + Duration::days(20))
            .unwrap();

        let expired = f.engine.expire_stale(start + Duration::days(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old.id);
        assert_eq!(f.engine.get(fresh.id).unwrap().status, ReferralStatus::Pending);
        assert!(f.engine.expire_stale(start + Duration::days(30)).is_empty());
    }

    #[test]
    fn test_late_confirmation_expires_instead() {
        let f = fixture();
        let start = Utc::now();
        let referral = f.engine.create(f.friend, "REF123", start).unwrap();
        let err = f
            .engine
            .complete(referral.id, &purchase("late", dec!(99)), start + Duration::days(31))
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::InvalidTransition { .. }));
        assert_eq!(f.engine.get(referral.id).unwrap().status, ReferralStatus::Expired);
    }

    #[test]
    fn test_cumulative_value_moves_referrer_up_a_tier() {
        let f = fixture();
        let now = Utc::now();
        let a = f.engine.create(f.friend, "REF123", now).unwrap();
        let b = f.engine.create(f.other, "REF123", now).unwrap();

        // 0.05 * 600
        let first = f.engine.complete(a.id, &purchase("e1", dec!(600)), now).unwrap();
        assert_eq!(first.commission_earned, Some(dec!(30.00)));
        // cumulative 1100 including this one -> 0.075 * 500
        let quote = f.engine.compute_commission(f.referrer, "sku-1", dec!(500)).unwrap();
        assert_eq!(quote.amount, dec!(37.50));
        let second = f.engine.complete(b.id, &purchase("e2", dec!(500)), now).unwrap();
        assert_eq!(second.commission_earned, Some(dec!(37.50)));

        let earnings = f.engine.earnings(f.referrer);
        assert_eq!(earnings.completed, 2);
        assert_eq!(earnings.completed_value, dec!(1100));
        assert_eq!(earnings.total_commission, dec!(67.50));
    }
}
