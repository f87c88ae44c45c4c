//! Data model shared by the feature builder, the scorers and the engine.
//!
//! Input records (`InteractionRecord`, `RatingRecord`, `ItemRecord`) are read-only
//! snapshots owned by upstream stores. Output records (`RecommendationItem`,
//! `Explanation`) are produced per request and never persisted by the engine.

use crate::scorer::{MethodWeights, ScoringMethod};
use crate::switching::RecommendationMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of implicit or explicit feedback recorded for a (user, item) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Click,
    Like,
    Share,
    AddToCart,
    Purchase,
    Rating,
    Dislike,
}

impl InteractionType {
    /// Weight used when a record carries no explicit value
    pub fn default_weight(&self) -> f32 {
        match self {
            InteractionType::View => 1.0,
            InteractionType::Click => 1.5,
            InteractionType::Like => 2.0,
            InteractionType::Share => 2.5,
            InteractionType::AddToCart => 3.0,
            InteractionType::Purchase => 4.0,
            InteractionType::Rating => 1.0,
            InteractionType::Dislike => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Click => "click",
            InteractionType::Like => "like",
            InteractionType::Share => "share",
            InteractionType::AddToCart => "add_to_cart",
            InteractionType::Purchase => "purchase",
            InteractionType::Rating => "rating",
            InteractionType::Dislike => "dislike",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" | "watch" => Ok(InteractionType::View),
            "click" => Ok(InteractionType::Click),
            "like" => Ok(InteractionType::Like),
            "share" => Ok(InteractionType::Share),
            "add_to_cart" | "cart" => Ok(InteractionType::AddToCart),
            "purchase" => Ok(InteractionType::Purchase),
            "rating" | "rate" => Ok(InteractionType::Rating),
            "dislike" => Ok(InteractionType::Dislike),
            other => Err(format!("unknown interaction type: {other}")),
        }
    }
}

/// Append-only interaction log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub interaction_type: InteractionType,
    pub value: f32,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    /// Record with the type's default weight as value
    pub fn new(user_id: Uuid, item_id: Uuid, interaction_type: InteractionType) -> Self {
        Self {
            user_id,
            item_id,
            interaction_type,
            value: interaction_type.default_weight(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_value(mut self, value: f32) -> Self {
        self.value = value;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Explicit rating; the latest rating for a (user, item) pair wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub rating: f32,
    pub review: Option<String>,
}

impl RatingRecord {
    pub fn new(user_id: Uuid, item_id: Uuid, rating: f32) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            review: None,
        }
    }
}

/// Catalog entry used for content modeling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    /// Sorted by key so numeric feature columns are stable across trainings
    pub numeric_features: BTreeMap<String, f32>,
    pub popularity_score: f32,
}

impl ItemRecord {
    pub fn new(id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            category: None,
            tags: BTreeSet::new(),
            numeric_features: BTreeMap::new(),
            popularity_score: 0.0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_numeric_feature(mut self, name: impl Into<String>, value: f32) -> Self {
        self.numeric_features.insert(name.into(), value);
        self
    }

    pub fn with_popularity(mut self, popularity_score: f32) -> Self {
        self.popularity_score = popularity_score;
        self
    }
}

/// Immutable, point-in-time bundle fed to training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub tenant_id: Uuid,
    pub interactions: Vec<InteractionRecord>,
    pub ratings: Vec<RatingRecord>,
    pub items: Vec<ItemRecord>,
    pub captured_at: DateTime<Utc>,
}

impl TrainingSnapshot {
    pub fn new(
        tenant_id: Uuid,
        interactions: Vec<InteractionRecord>,
        ratings: Vec<RatingRecord>,
        items: Vec<ItemRecord>,
    ) -> Self {
        Self {
            tenant_id,
            interactions,
            ratings,
            items,
            captured_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty() && self.ratings.is_empty() && self.items.is_empty()
    }
}

/// One ranked entry of a recommendation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: Uuid,
    pub score: f32,
    pub reason: Option<String>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl RecommendationItem {
    pub fn new(item_id: Uuid, score: f32) -> Self {
        Self {
            item_id,
            score,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// List length used when a request does not set one
pub const DEFAULT_NUM_RECOMMENDATIONS: usize = 10;

/// Per-request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub num_recommendations: usize,
    pub exclude_items: BTreeSet<Uuid>,
    /// Empty means every category is admitted
    pub include_categories: BTreeSet<String>,
    pub exclude_categories: BTreeSet<String>,
    pub min_score: f32,
    pub diversify: bool,
    pub explain: bool,
}

impl RecommendationContext {
    pub fn new(user_id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            user_id,
            tenant_id,
            num_recommendations: DEFAULT_NUM_RECOMMENDATIONS,
            exclude_items: BTreeSet::new(),
            include_categories: BTreeSet::new(),
            exclude_categories: BTreeSet::new(),
            min_score: 0.0,
            diversify: true,
            explain: false,
        }
    }

    pub fn with_limit(mut self, num_recommendations: usize) -> Self {
        self.num_recommendations = num_recommendations;
        self
    }

    pub fn excluding<I: IntoIterator<Item = Uuid>>(mut self, items: I) -> Self {
        self.exclude_items.extend(items);
        self
    }

    pub fn including_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn excluding_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_diversify(mut self, diversify: bool) -> Self {
        self.diversify = diversify;
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn admits_category(&self, category: Option<&str>) -> bool {
        if !self.include_categories.is_empty() {
            match category {
                Some(c) if self.include_categories.contains(c) => {}
                _ => return false,
            }
        }
        match category {
            Some(c) => !self.exclude_categories.contains(c),
            None => true,
        }
    }

    /// Exclusion list and category filters, without the score threshold
    pub fn admits(&self, item_id: Uuid, category: Option<&str>) -> bool {
        !self.exclude_items.contains(&item_id) && self.admits_category(category)
    }
}

/// Why an item was (or would be) recommended to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub method: String,
    pub summary: String,
    pub detail: ExplanationDetail,
}

impl Explanation {
    pub fn insufficient_data(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            summary: "Not enough data for explanation".to_string(),
            detail: ExplanationDetail::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarInteractedItem {
    pub item_id: Uuid,
    pub similarity: f32,
    pub user_value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor_index: usize,
    pub contribution: f32,
    pub user_factor: f32,
    pub item_factor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingFeature {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentExplanation {
    pub method: ScoringMethod,
    pub weight: f32,
    pub explanation: Explanation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplanationDetail {
    UserBased {
        similar_users_count: usize,
        top_similar_users: Vec<(Uuid, f32)>,
    },
    ItemBased {
        similar_items_count: usize,
        top_similar_items: Vec<SimilarInteractedItem>,
    },
    Svd {
        predicted_rating: f32,
        /// Width-normalized certainty in (0, 1]; 1.0 means zero residual error
        confidence: f32,
        confidence_interval: (f32, f32),
        top_factors: Vec<FactorContribution>,
    },
    ImplicitFactors {
        score: f32,
        factors: usize,
        user_interaction_count: usize,
        recent_interactions: Vec<Uuid>,
    },
    Content {
        similarity: f32,
        item_category: Option<String>,
        item_title: Option<String>,
        matching_features: Vec<MatchingFeature>,
    },
    Hybrid {
        weights: MethodWeights,
        components: Vec<ComponentExplanation>,
    },
    Switching {
        mode: RecommendationMode,
        reason: String,
        method_explanation: Option<Box<Explanation>>,
    },
    InsufficientData,
}
