//! Shared snapshot for integration tests
//!
//! Users u1..u3 are `id(1..=3)`, items i1..i5 are `id(11..=15)`, tenant is `id(0)`.

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use hybrid_recommender::{InteractionRecord, InteractionType, ItemRecord, TrainingSnapshot};
use uuid::Uuid;

pub const TENANT: u128 = 0;

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn items() -> Vec<ItemRecord> {
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
pub fn snapshot() -> TrainingSnapshot {
    snapshot_with(&[])
}

/// The base snapshot followed by `extra` `(user, item, rating)` interactions
pub fn snapshot_with(extra: &[(u128, u128, f32)]) -> TrainingSnapshot {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let base = [
        (1, 11, 5.0),
        (1, 12, 4.0),
        (2, 11, 4.0),
        (2, 13, 5.0),
        (3, 13, 5.0),
        (3, 14, 4.0),
    ];

    let interactions = base
        .iter()
        .chain(extra)
        .enumerate()
        .map(|(n, &(user, item, value))| {
            InteractionRecord::new(id(user), id(item), InteractionType::Rating)
                .with_value(value)
                .at(start + Duration::minutes(n as i64))
        })
        .collect();

    TrainingSnapshot::new(id(TENANT), interactions, vec![], items())
}
