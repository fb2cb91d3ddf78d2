//! Shared domain model for the storefront loyalty, referral and promotion
//! engines: entity types, configuration, the error taxonomy, and the
//! collaborator contracts (customer directory, event sink).

pub mod config;
pub mod customer;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod loyalty;
pub mod promotion;
pub mod referral;

pub use config::AppConfig;
pub use error::{LoyaltyError, LoyaltyResult};
