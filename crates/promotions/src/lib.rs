//! Page-scoped promotion selection with priority and frequency rules.

pub mod selector;

pub use selector::PromotionSelector;
