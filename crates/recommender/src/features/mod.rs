//! Item feature extraction
//!
//! Each item becomes one dense row made of three weighted blocks:
//! - TF-IDF over title, description, tags and category
//! - one-hot category
//! - normalized numeric values, popularity first

pub mod numeric;
pub mod text;

use crate::config::FeatureConfig;
use crate::error::ScorerError;
use crate::index::IndexMapping;
use crate::types::ItemRecord;
use ndarray::{concatenate, Array2, ArrayView1, Axis};
use std::collections::BTreeSet;
use uuid::Uuid;

pub use text::TfidfModel;

/// Category used for items without one
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Dense item x feature matrix, rows in item index order
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    items: IndexMapping,
    matrix: Array2<f32>,
    feature_names: Vec<String>,
    text_dims: usize,
    categorical_dims: usize,
    numeric_dims: usize,
}

impl FeatureMatrix {
    pub fn items(&self) -> &IndexMapping {
        &self.items
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn row(&self, item_id: &Uuid) -> Option<ArrayView1<f32>> {
        self.items.index_of(item_id).map(|idx| self.matrix.row(idx))
    }

    pub fn num_items(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn dims(&self) -> usize {
        self.matrix.ncols()
    }

    /// `(text, categorical, numeric)` block widths
    pub fn block_dims(&self) -> (usize, usize, usize) {
        (self.text_dims, self.categorical_dims, self.numeric_dims)
    }

    pub fn feature_name(&self, idx: usize) -> Option<&str> {
        self.feature_names.get(idx).map(String::as_str)
    }
}

/// Build the combined feature matrix
///
/// Duplicate ids keep their first position and their last record.
pub fn build_features(
    items: &[ItemRecord],
    config: &FeatureConfig,
) -> Result<FeatureMatrix, ScorerError> {
    if items.is_empty() {
        return Err(ScorerError::insufficient("item catalog is empty"));
    }

    let mut mapping = IndexMapping::new();
    let mut records: Vec<&ItemRecord> = Vec::with_capacity(items.len());
    for item in items {
        let idx = mapping.insert(item.id);
        if idx == records.len() {
            records.push(item);
        } else {
            records[idx] = item;
        }
    }

    // Text
    let documents: Vec<String> = records.iter().map(|i| text::item_document(i)).collect();
    let (tfidf, text_block) = TfidfModel::fit_transform(&documents, config);

    // Categorical
    let categories: Vec<String> = records
        .iter()
        .map(|i| i.category.as_deref().unwrap_or(UNKNOWN_CATEGORY).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut categorical_block = Array2::<f32>::zeros((records.len(), categories.len()));
    for (row, item) in records.iter().enumerate() {
        let category = item.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
        if let Ok(col) = categories.binary_search_by(|c| c.as_str().cmp(category)) {
            categorical_block[[row, col]] = 1.0;
        }
    }

    // Numeric
    let mut numeric_block = numeric::raw_numeric_block(&records, config.numeric_width);
    numeric::normalize(&mut numeric_block, config.normalization);

    let text_block = text_block * config.text_weight;
    let categorical_block = categorical_block * config.categorical_weight;
    let numeric_block = numeric_block * config.numeric_weight;

    let matrix = concatenate(
        Axis(1),
        &[
            text_block.view(),
            categorical_block.view(),
            numeric_block.view(),
        ],
    )
    .map_err(|e| ScorerError::Numerical(format!("feature concatenation failed: {e}")))?;

    if matrix.ncols() == 0 || matrix.iter().all(|v| *v == 0.0) {
        return Err(ScorerError::insufficient("no item features could be extracted"));
    }

    let mut feature_names: Vec<String> = tfidf
        .vocabulary()
        .iter()
        .map(|term| format!("text:{term}"))
        .collect();
    feature_names.extend(categories.iter().map(|c| format!("category:{c}")));
    feature_names.extend(numeric::column_names(config.numeric_width));

    tracing::debug!(
        items = records.len(),
        text_dims = tfidf.len(),
        categorical_dims = categories.len(),
        numeric_dims = config.numeric_width,
        "Built item feature matrix"
    );

    Ok(FeatureMatrix {
        items: mapping,
        matrix,
        feature_names,
        text_dims: tfidf.len(),
        categorical_dims: categories.len(),
        numeric_dims: config.numeric_width,
    })
}
