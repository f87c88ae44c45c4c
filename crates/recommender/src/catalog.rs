//! Read-only lookups derived from a training snapshot

use crate::features::UNKNOWN_CATEGORY;
use crate::index::IndexMapping;
use crate::similarity::sort_scored;
use crate::types::{ItemRecord, TrainingSnapshot};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Item records by id, duplicates collapsed onto their first position
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    index: IndexMapping,
    records: Vec<ItemRecord>,
}

impl ItemCatalog {
    pub fn new(items: &[ItemRecord]) -> Self {
        let mut index = IndexMapping::new();
        let mut records: Vec<ItemRecord> = Vec::with_capacity(items.len());
        for item in items {
            let idx = index.insert(item.id);
            if idx == records.len() {
                records.push(item.clone());
            } else {
                records[idx] = item.clone();
            }
        }
        Self { index, records }
    }

    pub fn get(&self, item_id: &Uuid) -> Option<&ItemRecord> {
        self.index.index_of(item_id).map(|idx| &self.records[idx])
    }

    pub fn contains(&self, item_id: &Uuid) -> bool {
        self.index.contains(item_id)
    }

    pub fn category_of(&self, item_id: &Uuid) -> Option<&str> {
        self.get(item_id).and_then(|i| i.category.as_deref())
    }

    /// Category bucket used for diversification
    pub fn category_bucket(&self, item_id: &Uuid) -> &str {
        self.category_of(item_id).unwrap_or(UNKNOWN_CATEGORY)
    }

    pub fn records(&self) -> &[ItemRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every item ranked by `popularity_score`, best first
    pub fn by_popularity(&self) -> Vec<(Uuid, f32)> {
        let mut ranked: Vec<(Uuid, f32)> = self
            .records
            .iter()
            .map(|i| {
                let score = if i.popularity_score.is_finite() {
                    i.popularity_score
                } else {
                    0.0
                };
                (i.id, score)
            })
            .collect();
        sort_scored(&mut ranked);
        ranked
    }
}

/// What each user has already touched, across interactions and ratings
#[derive(Debug, Clone, Default)]
pub struct UserHistory {
    seen: HashMap<Uuid, HashSet<Uuid>>,
    counts: HashMap<Uuid, usize>,
    recent: HashMap<Uuid, Vec<(DateTime<Utc>, Uuid)>>,
}

impl UserHistory {
    pub fn from_snapshot(snapshot: &TrainingSnapshot) -> Self {
        let mut history = UserHistory::default();

        for i in &snapshot.interactions {
            history.seen.entry(i.user_id).or_default().insert(i.item_id);
            *history.counts.entry(i.user_id).or_insert(0) += 1;
            history
                .recent
                .entry(i.user_id)
                .or_default()
                .push((i.timestamp, i.item_id));
        }
        for r in &snapshot.ratings {
            history.seen.entry(r.user_id).or_default().insert(r.item_id);
            *history.counts.entry(r.user_id).or_insert(0) += 1;
        }

        for events in history.recent.values_mut() {
            events.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        }

        history
    }

    pub fn has_seen(&self, user_id: &Uuid, item_id: &Uuid) -> bool {
        self.seen
            .get(user_id)
            .map_or(false, |items| items.contains(item_id))
    }

    pub fn seen(&self, user_id: &Uuid) -> Option<&HashSet<Uuid>> {
        self.seen.get(user_id)
    }

    /// Interaction and rating rows recorded for the user
    pub fn interaction_count(&self, user_id: &Uuid) -> usize {
        self.counts.get(user_id).copied().unwrap_or(0)
    }

    /// Distinct items from the user's latest interactions, newest first
    pub fn recent_items(&self, user_id: &Uuid, limit: usize) -> Vec<Uuid> {
        let mut out = Vec::with_capacity(limit);
        if let Some(events) = self.recent.get(user_id) {
            for (_, item) in events {
                if out.len() == limit {
                    break;
                }
                if !out.contains(item) {
                    out.push(*item);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InteractionRecord, InteractionType, RatingRecord};
    use chrono::Duration;

    #[test]
    fn test_catalog_popularity_and_categories() {
        let catalog = ItemCatalog::new(&[
            ItemRecord::new(Uuid::from_u128(1), "a").with_popularity(1.0),
            ItemRecord::new(Uuid::from_u128(2), "b")
                .with_popularity(3.0)
                .with_category("books"),
            ItemRecord::new(Uuid::from_u128(1), "a2").with_popularity(2.0),
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(&Uuid::from_u128(1)).unwrap().title, "a2");
        assert_eq!(
            catalog.by_popularity(),
            vec![(Uuid::from_u128(2), 3.0), (Uuid::from_u128(1), 2.0)]
        );
        assert_eq!(catalog.category_bucket(&Uuid::from_u128(1)), "unknown");
        assert_eq!(catalog.category_of(&Uuid::from_u128(2)), Some("books"));
    }

    #[test]
    fn test_history() {
        let user = Uuid::from_u128(9);
        let now = Utc::now();
        let snapshot = TrainingSnapshot::new(
            Uuid::nil(),
            vec![
                InteractionRecord::new(user, Uuid::from_u128(1), InteractionType::View)
                    .at(now - Duration::hours(2)),
                InteractionRecord::new(user, Uuid::from_u128(2), InteractionType::Click)
                    .at(now),
                InteractionRecord::new(user, Uuid::from_u128(1), InteractionType::Like)
                    .at(now - Duration::hours(1)),
            ],
            vec![RatingRecord::new(user, Uuid::from_u128(3), 4.0)],
            vec![],
        );

        let history = UserHistory::from_snapshot(&snapshot);
        assert_eq!(history.interaction_count(&user), 4);
        assert!(history.has_seen(&user, &Uuid::from_u128(3)));
        assert!(!history.has_seen(&Uuid::from_u128(8), &Uuid::from_u128(3)));
        assert_eq!(
            history.recent_items(&user, 5),
            vec![Uuid::from_u128(2), Uuid::from_u128(1)]
        );
        assert_eq!(history.recent_items(&user, 1), vec![Uuid::from_u128(2)]);
    }
}
