//! Shared training data for unit tests
//!
//! Users are `id(1..=3)`, items `id(11..=15)`, tenant `id(0)`.

use crate::catalog::{ItemCatalog, UserHistory};
use crate::config::FeatureConfig;
use crate::features::build_features;
use crate::scorer::TrainingData;
use crate::types::{InteractionRecord, InteractionType, ItemRecord, TrainingSnapshot};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn scenario_items() -> Vec<ItemRecord> {
    vec![
        ItemRecord::new(id(11), "Star Voyage")
            .with_description("space adventure among distant stars")
            .with_category("scifi")
            .with_tags(["space", "adventure"])
            .with_popularity(50.0),
        ItemRecord::new(id(12), "Nebula Quest")
            .with_description("space exploration adventure")
            .with_category("scifi")
            .with_tags(["space"])
            .with_popularity(40.0),
        ItemRecord::new(id(13), "Galactic Empire")
            .with_description("space empire politics and adventure")
            .with_category("scifi")
            .with_tags(["space", "politics"])
            .with_popularity(60.0),
        ItemRecord::new(id(14), "Kitchen Basics")
            .with_description("simple home cooking recipes")
            .with_category("cooking")
            .with_tags(["recipes"])
            .with_popularity(30.0),
        ItemRecord::new(id(15), "Baking Bread")
            .with_description("home baking recipes for bread")
            .with_category("cooking")
            .with_tags(["recipes", "baking"])
            .with_popularity(90.0),
    ]
}

/// 3 users, 5 items, six rated interactions
pub fn scenario_snapshot() -> TrainingSnapshot {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    let triples = [
        (1, 11, 5.0),
        (1, 12, 4.0),
        (2, 11, 4.0),
        (2, 13, 5.0),
        (3, 13, 5.0),
        (3, 14, 4.0),
    ];

    let interactions = triples
        .iter()
        .enumerate()
        .map(|(n, &(user, item, value))| {
            InteractionRecord::new(id(user), id(item), InteractionType::Rating)
                .with_value(value)
                .at(start + Duration::minutes(n as i64))
        })
        .collect();

    TrainingSnapshot::new(id(0), interactions, vec![], scenario_items())
}

pub fn training_data(snapshot: &TrainingSnapshot) -> TrainingData<'_> {
    TrainingData {
        snapshot,
        catalog: Arc::new(ItemCatalog::new(&snapshot.items)),
        history: Arc::new(UserHistory::from_snapshot(snapshot)),
        features: build_features(&snapshot.items, &FeatureConfig::default()).map(Arc::new),
    }
}
