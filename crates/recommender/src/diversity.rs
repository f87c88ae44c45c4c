//! Diversity Filter
//!
//! Caps how many items of one category may appear in a final list.

use crate::catalog::ItemCatalog;
use crate::types::RecommendationItem;
use std::collections::HashMap;

/// Apply the per-category cap
///
/// Steps:
/// 1. Walk candidates in their ranked order
/// 2. Keep an item while its category is below `max_per_category`
/// 3. Stop once `limit` items are kept
///
/// Items without a category share the `unknown` bucket. Relative order of the
/// kept items is unchanged.
pub struct ApplyDiversityFilter;

impl ApplyDiversityFilter {
    pub fn execute(
        candidates: Vec<RecommendationItem>,
        catalog: &ItemCatalog,
        max_per_category: usize,
        limit: usize,
    ) -> Vec<RecommendationItem> {
        let mut category_counts: HashMap<&str, usize> = HashMap::new();
        let mut selected = Vec::with_capacity(limit.min(candidates.len()));

        for candidate in candidates {
            if selected.len() >= limit {
                break;
            }

            let count = category_counts
                .entry(catalog.category_bucket(&candidate.item_id))
                .or_insert(0);
            if *count < max_per_category {
                *count += 1;
                selected.push(candidate);
            }
        }

        selected
    }
}
