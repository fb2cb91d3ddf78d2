//! Inbound events from the order/checkout system.
//!
//! Delivery is at-least-once; consumers dedupe by `event_id`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseConfirmed {
    pub event_id: String,
    pub customer_id: Uuid,
    pub product_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundIssued {
    pub event_id: String,
    pub customer_id: Uuid,
    pub amount: Decimal,
}

/// Envelope for replaying a mixed event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    PurchaseConfirmed(PurchaseConfirmed),
    RefundIssued(RefundIssued),
}

impl OrderEvent {
    pub fn event_id(&self) -> &str {
        match self {
            OrderEvent::PurchaseConfirmed(e) => &e.event_id,
            OrderEvent::RefundIssued(e) => &e.event_id,
        }
    }
}
