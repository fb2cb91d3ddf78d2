//! Storefront loyalty engine: wires the points ledger, reward catalog,
//! referral tracker and promotion selector behind one event-driven facade.

pub mod engine;

pub use engine::{EventOutcome, PurchaseOutcome, RefundOutcome, SignupOutcome, StorefrontEngine};
