//! Outbound notification bus: trait for emitting loyalty events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>`; tier changes, issued reward codes,
//! and earned commissions are requests for external collaborators
//! (messaging, fulfillment, payouts) to act on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::loyalty::{RewardCode, TierChange};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyEventType {
    TierChanged,
    RewardIssued,
    CommissionEarned,
    ReferralExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoyaltyEvent {
    TierChanged(TierChange),
    RewardIssued(RewardCode),
    CommissionEarned {
        referral_id: Uuid,
        referrer_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    ReferralExpired {
        referral_id: Uuid,
        referrer_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl LoyaltyEvent {
    pub fn event_type(&self) -> LoyaltyEventType {
        match self {
            LoyaltyEvent::TierChanged(_) => LoyaltyEventType::TierChanged,
            LoyaltyEvent::RewardIssued(_) => LoyaltyEventType::RewardIssued,
            LoyaltyEvent::CommissionEarned { .. } => LoyaltyEventType::CommissionEarned,
            LoyaltyEvent::ReferralExpired { .. } => LoyaltyEventType::ReferralExpired,
        }
    }
}

/// Trait for emitting loyalty events to downstream collaborators.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LoyaltyEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: LoyaltyEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<LoyaltyEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LoyaltyEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: LoyaltyEventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: LoyaltyEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tier_event(to_level: u32) -> LoyaltyEvent {
        LoyaltyEvent::TierChanged(TierChange {
            account_id: Uuid::new_v4(),
            from_level: 0,
            to_level,
            tier_name: "silver".into(),
        })
    }

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.emit(tier_event(1));
        sink.emit(LoyaltyEvent::ReferralExpired {
            referral_id: Uuid::new_v4(),
            referrer_id: Uuid::new_v4(),
            at: Utc::now(),
        });

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(LoyaltyEventType::TierChanged), 1);
        assert_eq!(sink.count_type(LoyaltyEventType::ReferralExpired), 1);
        assert_eq!(sink.count_type(LoyaltyEventType::RewardIssued), 0);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(tier_event(2));
    }
}
