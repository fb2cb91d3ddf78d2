//! Marketing promotion catalog and per-session display history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    Banner,
    Popup,
    SlideIn,
    Notification,
}

/// How often a promotion may be shown to the same visitor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFrequency {
    /// Never again once shown to this customer.
    Once,
    /// At most once per UTC day.
    Daily,
    /// At most once per session.
    SessionBased,
    Always,
}

/// Time- and page-scoped marketing offer. Immutable catalog data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    pub id: Uuid,
    pub kind: PromotionKind,
    pub title: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub target_pages: Vec<String>,
    pub display_frequency: DisplayFrequency,
    /// Seconds the caller should wait before presenting.
    #[serde(default)]
    pub display_delay: u32,
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

impl Promotion {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }

    pub fn targets(&self, page: &str) -> bool {
        self.target_pages.iter().any(|p| p == page)
    }
}

/// A record that a promotion was presented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromotionImpression {
    pub promotion_id: Uuid,
    pub session_id: String,
    pub shown_at: DateTime<Utc>,
}

/// Display history for one visitor, owned by their session.
///
/// `impressions` spans all of the visitor's sessions so that `Once` and
/// `Daily` frequencies can be honored across them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionHistory {
    pub session_id: String,
    #[serde(default)]
    pub impressions: Vec<PromotionImpression>,
}

impl SessionHistory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            impressions: Vec::new(),
        }
    }

    /// Record that `promotion_id` was shown in the current session.
    pub fn record(&mut self, promotion_id: Uuid, now: DateTime<Utc>) {
        self.impressions.push(PromotionImpression {
            promotion_id,
            session_id: self.session_id.clone(),
            shown_at: now,
        });
    }

    pub fn shown_ever(&self, promotion_id: Uuid) -> bool {
        self.impressions.iter().any(|i| i.promotion_id == promotion_id)
    }

    pub fn shown_in_session(&self, promotion_id: Uuid) -> bool {
        self.impressions
            .iter()
            .any(|i| i.promotion_id == promotion_id && i.session_id == self.session_id)
    }

    pub fn shown_on_day(&self, promotion_id: Uuid, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        self.impressions
            .iter()
            .any(|i| i.promotion_id == promotion_id && i.shown_at.date_naive() == today)
    }
}

/// A chosen promotion plus how long the caller should hold it back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromotionSelection {
    pub promotion: Promotion,
    pub display_delay_secs: u32,
}
