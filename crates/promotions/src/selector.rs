//! Picks at most one promotion for a page view.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use storefront_core::config::PromotionConfig;
use storefront_core::promotion::{DisplayFrequency, Promotion, PromotionSelection, SessionHistory};

/// Synchronous, side-effect free promotion chooser over an immutable catalog.
#[derive(Debug, Clone)]
pub struct PromotionSelector {
    catalog: Arc<Vec<Promotion>>,
}

impl PromotionSelector {
    pub fn new(catalog: Vec<Promotion>) -> Self {
        info!(promotions = catalog.len(), "Promotion selector initialized");
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn from_config(config: &PromotionConfig) -> Self {
        Self::new(config.catalog.clone())
    }

    pub fn catalog(&self) -> &[Promotion] {
        &self.catalog
    }

    /// Every promotion that may be shown on `page` now, best first.
    pub fn eligible(
        &self,
        page: &str,
        history: &SessionHistory,
        now: DateTime<Utc>,
    ) -> Vec<&Promotion> {
        let mut candidates: Vec<&Promotion> = self
            .catalog
            .iter()
            .filter(|p| p.is_live(now) && p.targets(page))
            .filter(|p| !suppressed(p, history, now))
            .collect();
        candidates.sort_by(|a, b| rank(a, b));
        candidates
    }

    /// The single best promotion for `page`, or `None`.
    ///
    /// Identical inputs always yield the same result. The caller honors
    /// `display_delay_secs` before presenting.
    pub fn select(
        &self,
        page: &str,
        history: &SessionHistory,
        now: DateTime<Utc>,
    ) -> Option<PromotionSelection> {
        let chosen = self
            .catalog
            .iter()
            .filter(|p| p.is_live(now) && p.targets(page))
            .filter(|p| !suppressed(p, history, now))
            .min_by(|a, b| rank(a, b))?;

        metrics::counter!("promotions.selected").increment(1);
        debug!(
            promotion_id = %chosen.id,
            page,
            priority = chosen.priority,
            delay = chosen.display_delay,
            "Promotion selected"
        );
        Some(PromotionSelection {
            promotion: chosen.clone(),
            display_delay_secs: chosen.display_delay,
        })
    }

    /// Select and record the impression in `history`.
    pub fn present(
        &self,
        page: &str,
        history: &mut SessionHistory,
        now: DateTime<Utc>,
    ) -> Option<PromotionSelection> {
        let selection = self.select(page, history, now)?;
        history.record(selection.promotion.id, now);
        Some(selection)
    }
}

/// Higher priority first, then earliest start, then lowest id.
fn rank(a: &Promotion, b: &Promotion) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.start_date.cmp(&b.start_date))
        .then(a.id.cmp(&b.id))
}

fn suppressed(promotion: &Promotion, history: &SessionHistory, now: DateTime<Utc>) -> bool {
    match promotion.display_frequency {
        DisplayFrequency::Once => history.shown_ever(promotion.id),
        DisplayFrequency::Daily => history.shown_on_day(promotion.id, now),
        DisplayFrequency::SessionBased => history.shown_in_session(promotion.id),
        DisplayFrequency::Always => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use storefront_core::promotion::PromotionKind;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn promo(priority: i32, frequency: DisplayFrequency) -> Promotion {
        Promotion {
            id: Uuid::new_v4(),
            kind: PromotionKind::Popup,
            title: format!("p{priority}"),
            is_active: true,
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(1),
            target_pages: vec!["/".into(), "/shop".into()],
            display_frequency: frequency,
            display_delay: 0,
            priority,
        }
    }

    #[test]
    fn test_picks_highest_priority() {
        let low = promo(1, DisplayFrequency::Always);
        let high = promo(9, DisplayFrequency::Always);
        let selector = PromotionSelector::new(vec![low, high.clone()]);
        let picked = selector.select("/", &SessionHistory::new("s1"), now()).unwrap();
        assert_eq!(picked.promotion.id, high.id);
    }

    #[test]
    fn test_window_page_and_active_filters() {
        let mut future = promo(5, DisplayFrequency::Always);
        future.start_date = now() + Duration::hours(1);
        let mut inactive = promo(5, DisplayFrequency::Always);
        inactive.is_active = false;
        let mut other_page = promo(5, DisplayFrequency::Always);
        other_page.target_pages = vec!["/blog".into()];
        let mut ends_now = promo(1, DisplayFrequency::Always);
        ends_now.end_date = now();

        let selector = PromotionSelector::new(vec![future, inactive, other_page, ends_now.clone()]);
        let picked = selector.select("/shop", &SessionHistory::new("s1"), now()).unwrap();
        assert_eq!(picked.promotion.id, ends_now.id);
        assert!(selector.select("/cart", &SessionHistory::new("s1"), now()).is_none());
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        let mut early = promo(3, DisplayFrequency::Always);
        early.start_date = now() - Duration::days(5);
        let late = promo(3, DisplayFrequency::Always);
        let selector = PromotionSelector::new(vec![late.clone(), early.clone()]);
        let history = SessionHistory::new("s1");
        for _ in 0..5 {
            assert_eq!(
                selector.select("/", &history, now()).unwrap().promotion.id,
                early.id
            );
        }

        let mut a = promo(3, DisplayFrequency::Always);
        let mut b = promo(3, DisplayFrequency::Always);
        b.start_date = a.start_date;
        if b.id < a.id {
            std::mem::swap(&mut a, &mut b);
        }
        let selector = PromotionSelector::new(vec![b, a.clone()]);
        assert_eq!(selector.select("/", &history, now()).unwrap().promotion.id, a.id);
    }

    #[test]
    fn test_once_is_never_repeated() {
        let once = promo(5, DisplayFrequency::Once);
        let selector = PromotionSelector::new(vec![once.clone()]);
        let mut history = SessionHistory::new("s1");
        assert!(selector.present("/", &mut history, now()).is_some());
        assert!(selector.select("/", &history, now()).is_none());

        history.session_id = "s2".into();
        assert!(selector
            .select("/", &history, now() + Duration::days(1))
            .is_none());
    }

    #[test]
    fn test_daily_resets_next_day() {
        let daily = promo(5, DisplayFrequency::Daily);
        let selector = PromotionSelector::new(vec![daily]);
        let mut history = SessionHistory::new("s1");
        selector.present("/", &mut history, now()).unwrap();
        assert!(selector.select("/", &history, now() + Duration::hours(6)).is_none());
        assert!(selector.select("/", &history, now() + Duration::hours(13)).is_some());
    }

    #[test]
    fn test_session_based_resets_with_new_session() {
        let session = promo(5, DisplayFrequency::SessionBased);
        let fallback = promo(1, DisplayFrequency::Always);
        let selector = PromotionSelector::new(vec![session.clone(), fallback.clone()]);
        let mut history = SessionHistory::new("s1");

        assert_eq!(
            selector.present("/", &mut history, now()).unwrap().promotion.id,
            session.id
        );
        assert_eq!(
            selector.present("/", &mut history, now()).unwrap().promotion.id,
            fallback.id
        );
        history.session_id = "s2".into();
        assert_eq!(selector.select("/", &history, now()).unwrap().promotion.id, session.id);
    }

    #[test]
    fn test_display_delay_is_reported() {
        let mut delayed = promo(5, DisplayFrequency::Always);
        delayed.display_delay = 8;
        let selector = PromotionSelector::new(vec![delayed]);
        let picked = selector.select("/", &SessionHistory::new("s1"), now()).unwrap();
        assert_eq!(picked.display_delay_secs, 8);
    }

    #[test]
    fn test_eligible_orders_best_first() {
        let a = promo(1, DisplayFrequency::Always);
        let b = promo(7, DisplayFrequency::Always);
        let c = promo(4, DisplayFrequency::Always);
        let selector = PromotionSelector::new(vec![a.clone(), b.clone(), c.clone()]);
        let ids: Vec<_> = selector
            .eligible("/", &SessionHistory::new("s1"), now())
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, [b.id, c.id, a.id]);
    }
}
