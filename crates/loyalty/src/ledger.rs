//! Append-only points ledger with derived balances and monotonic tiers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use storefront_core::error::{LoyaltyError, LoyaltyResult};
use storefront_core::event_bus::{EventSink, LoyaltyEvent};
use storefront_core::loyalty::{
    EarnOutcome, LoyaltyAccount, LoyaltyTransaction, PointsBalance, TierChange, TransactionType,
};

use crate::tiers::TierCatalog;

/// One account plus its history. Mutated only under the map's entry guard,
/// which serializes writers per account.
#[derive(Debug, Clone)]
struct AccountLedger {
    account: LoyaltyAccount,
    transactions: Vec<LoyaltyTransaction>,
    balance: PointsBalance,
}

impl AccountLedger {
    fn append(
        &mut self,
        points: i64,
        transaction_type: TransactionType,
        description: String,
    ) -> LoyaltyTransaction {
        let tx = LoyaltyTransaction {
            id: Uuid::new_v4(),
            account_id: self.account.id,
            date: Utc::now(),
            points,
            transaction_type,
            description,
        };
        if transaction_type == TransactionType::Earned {
            self.balance.total += points;
        }
        self.balance.available += points;
        self.transactions.push(tx.clone());
        tx
    }
}

/// Points ledger: one append-only history per loyalty account.
#[derive(Clone)]
pub struct PointsLedger {
    tiers: Arc<TierCatalog>,
    accounts: Arc<DashMap<Uuid, AccountLedger>>,
    by_customer: Arc<DashMap<Uuid, Uuid>>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PointsLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointsLedger")
            .field("accounts", &self.accounts.len())
            .field("tiers", &self.tiers.tiers().len())
            .finish()
    }
}

impl PointsLedger {
    pub fn new(tiers: TierCatalog) -> Self {
        info!(tiers = tiers.tiers().len(), "Points ledger initialized");
        Self {
            tiers: Arc::new(tiers),
            accounts: Arc::new(DashMap::new()),
            by_customer: Arc::new(DashMap::new()),
            event_sink: storefront_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for tier-change notifications.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn tiers(&self) -> &TierCatalog {
        &self.tiers
    }

    /// Get or create the account for `customer_id`.
    pub fn open_account(
        &self,
        customer_id: Uuid,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<LoyaltyAccount> {
        match self.by_customer.entry(customer_id) {
            Entry::Occupied(slot) => self.account(*slot.get()),
            Entry::Vacant(slot) => {
                let account = LoyaltyAccount {
                    id: Uuid::new_v4(),
                    customer_id,
                    level: 0,
                    joined_date: now,
                };
                self.accounts.insert(
                    account.id,
                    AccountLedger {
                        account: account.clone(),
                        transactions: Vec::new(),
                        balance: PointsBalance::default(),
                    },
                );
                slot.insert(account.id);
                info!(customer_id = %customer_id, account_id = %account.id, "Loyalty account opened");
                metrics::counter!("loyalty.accounts_opened").increment(1);
                Ok(account)
            }
        }
    }

    pub fn account(&self, account_id: Uuid) -> LoyaltyResult<LoyaltyAccount> {
        self.accounts
            .get(&account_id)
            .map(|l| l.account.clone())
            .ok_or(LoyaltyError::AccountNotFound(account_id))
    }

    pub fn account_for_customer(&self, customer_id: Uuid) -> Option<LoyaltyAccount> {
        let account_id = *self.by_customer.get(&customer_id)?;
        self.account(account_id).ok()
    }

    /// Credit points. Recomputes the tier; upgrades emit `TierChanged`.
    pub fn earn(
        &self,
        account_id: Uuid,
        points: i64,
        description: impl Into<String>,
    ) -> LoyaltyResult<EarnOutcome> {
        if points <= 0 {
            return Err(LoyaltyError::InvalidAmount(points));
        }
        let mut ledger = self
            .accounts
            .get_mut(&account_id)
            .ok_or(LoyaltyError::AccountNotFound(account_id))?;

        let transaction = ledger.append(points, TransactionType::Earned, description.into());
        let balance = ledger.balance;
        let tier_change = self.promote(&mut ledger.account, balance.total);
        let level = ledger.account.level;
        drop(ledger);

        metrics::counter!("loyalty.points_earned").increment(points as u64);
        debug!(
            account_id = %account_id,
            points,
            total = balance.total,
            available = balance.available,
            level,
            "Points earned"
        );

        if let Some(change) = &tier_change {
            self.event_sink.emit(LoyaltyEvent::TierChanged(change.clone()));
        }

        Ok(EarnOutcome {
            transaction,
            balance,
            level,
            tier_change,
        })
    }

    /// Debit points. Fails without side effects if the balance is short.
    pub fn redeem(
        &self,
        account_id: Uuid,
        points: i64,
        description: impl Into<String>,
    ) -> LoyaltyResult<LoyaltyTransaction> {
        if points <= 0 {
            return Err(LoyaltyError::InvalidAmount(points));
        }
        let mut ledger = self
            .accounts
            .get_mut(&account_id)
            .ok_or(LoyaltyError::AccountNotFound(account_id))?;

        let available = ledger.balance.available;
        if available < points {
            warn!(account_id = %account_id, requested = points, available, "Redemption rejected");
            return Err(LoyaltyError::InsufficientBalance {
                requested: points,
                available,
            });
        }

        let transaction = ledger.append(-points, TransactionType::Redeemed, description.into());
        metrics::counter!("loyalty.points_redeemed").increment(points as u64);
        info!(
            account_id = %account_id,
            points,
            available = ledger.balance.available,
            "Points redeemed"
        );
        Ok(transaction)
    }

    /// Reverse up to `points` previously earned points after a refund.
    ///
    /// The reversal is clamped to the available balance and never demotes the
    /// account. Returns `None` when nothing was left to reverse.
    pub fn refund(
        &self,
        account_id: Uuid,
        points: i64,
        description: impl Into<String>,
    ) -> LoyaltyResult<Option<LoyaltyTransaction>> {
        if points <= 0 {
            return Err(LoyaltyError::InvalidAmount(points));
        }
        let mut ledger = self
            .accounts
            .get_mut(&account_id)
            .ok_or(LoyaltyError::AccountNotFound(account_id))?;

        let reversed = points.min(ledger.balance.available);
        if reversed <= 0 {
            debug!(account_id = %account_id, points, "Refund found no points to reverse");
            return Ok(None);
        }
        if reversed < points {
            warn!(
                account_id = %account_id,
                requested = points,
                reversed,
                "Refund reversal clamped to available balance"
            );
        }

        let transaction = ledger.append(-reversed, TransactionType::Earned, description.into());
        metrics::counter!("loyalty.points_reversed").increment(reversed as u64);
        Ok(Some(transaction))
    }

    pub fn balance(&self, account_id: Uuid) -> LoyaltyResult<PointsBalance> {
        self.accounts
            .get(&account_id)
            .map(|l| l.balance)
            .ok_or(LoyaltyError::AccountNotFound(account_id))
    }

    /// Snapshot of the account's history, oldest first.
    pub fn transactions(&self, account_id: Uuid) -> LoyaltyResult<Vec<LoyaltyTransaction>> {
        self.accounts
            .get(&account_id)
            .map(|l| l.transactions.clone())
            .ok_or(LoyaltyError::AccountNotFound(account_id))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn promote(&self, account: &mut LoyaltyAccount, lifetime_points: i64) -> Option<TierChange> {
        let target = self.tiers.tier_for(lifetime_points);
        if target.level <= account.level {
            return None;
        }
        let change = TierChange {
            account_id: account.id,
            from_level: account.level,
            to_level: target.level,
            tier_name: target.name.clone(),
        };
        account.level = target.level;

        metrics::counter!("loyalty.tier_upgrades").increment(1);
        info!(
            account_id = %account.id,
            old = change.from_level,
            new = change.to_level,
            tier = %change.tier_name,
            "Tier upgrade"
        );
        Some(change)
    }
}
