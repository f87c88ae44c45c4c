//! Sparse user x item matrix built from interaction and rating logs

use crate::error::ScorerError;
use crate::index::IndexMapping;
use crate::types::{InteractionRecord, RatingRecord};
use std::collections::HashMap;
use uuid::Uuid;

/// User x item matrix with row and column adjacency lists
///
/// Cell value is the latest rating for the pair when one exists, otherwise the
/// value of the last interaction row for the pair. Repeated rows overwrite.
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    users: IndexMapping,
    items: IndexMapping,
    rows: Vec<Vec<(usize, f32)>>,
    cols: Vec<Vec<(usize, f32)>>,
    nnz: usize,
}

impl InteractionMatrix {
    /// Build the matrix, dropping users and items with fewer than
    /// `min_interactions` observations
    pub fn build(
        interactions: &[InteractionRecord],
        ratings: &[RatingRecord],
        min_interactions: usize,
    ) -> Result<Self, ScorerError> {
        let mut latest_rating: HashMap<(Uuid, Uuid), f32> = HashMap::new();
        for r in ratings.iter().filter(|r| r.rating.is_finite()) {
            latest_rating.insert((r.user_id, r.item_id), r.rating);
        }

        // Step 1: observation sequence, interactions first then ratings
        let mut observations: Vec<(Uuid, Uuid, f32)> =
            Vec::with_capacity(interactions.len() + ratings.len());
        for i in interactions.iter().filter(|i| i.value.is_finite()) {
            let value = latest_rating
                .get(&(i.user_id, i.item_id))
                .copied()
                .unwrap_or(i.value);
            observations.push((i.user_id, i.item_id, value));
        }
        for r in ratings.iter().filter(|r| r.rating.is_finite()) {
            let value = latest_rating
                .get(&(r.user_id, r.item_id))
                .copied()
                .unwrap_or(r.rating);
            observations.push((r.user_id, r.item_id, value));
        }

        // Step 2: count-based filtering on the unfiltered log
        let mut user_counts: HashMap<Uuid, usize> = HashMap::new();
        let mut item_counts: HashMap<Uuid, usize> = HashMap::new();
        for (user, item, _) in &observations {
            *user_counts.entry(*user).or_insert(0) += 1;
            *item_counts.entry(*item).or_insert(0) += 1;
        }

        let mut users = IndexMapping::new();
        let mut items = IndexMapping::new();
        let mut cells: HashMap<(usize, usize), f32> = HashMap::new();

        for (user, item, value) in observations {
            if user_counts.get(&user).copied().unwrap_or(0) < min_interactions
                || item_counts.get(&item).copied().unwrap_or(0) < min_interactions
            {
                continue;
            }
            let u = users.insert(user);
            let i = items.insert(item);
            cells.insert((u, i), value);
        }

        if cells.is_empty() {
            return Err(ScorerError::insufficient(format!(
                "no users or items with at least {min_interactions} interactions"
            )));
        }

        // Step 3: adjacency lists sorted by index
        let mut rows = vec![Vec::new(); users.len()];
        let mut cols = vec![Vec::new(); items.len()];
        for (&(u, i), &value) in &cells {
            rows[u].push((i, value));
            cols[i].push((u, value));
        }
        for row in rows.iter_mut() {
            row.sort_by_key(|(i, _)| *i);
        }
        for col in cols.iter_mut() {
            col.sort_by_key(|(u, _)| *u);
        }

        tracing::debug!(
            users = users.len(),
            items = items.len(),
            nnz = cells.len(),
            "Built interaction matrix"
        );

        Ok(Self {
            users,
            items,
            rows,
            cols,
            nnz: cells.len(),
        })
    }

    pub fn users(&self) -> &IndexMapping {
        &self.users
    }

    pub fn items(&self) -> &IndexMapping {
        &self.items
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// `(item_idx, value)` pairs of a user row, ascending by item index
    pub fn row(&self, user_idx: usize) -> &[(usize, f32)] {
        self.rows.get(user_idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(user_idx, value)` pairs of an item column, ascending by user index
    pub fn col(&self, item_idx: usize) -> &[(usize, f32)] {
        self.cols.get(item_idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every user row, indexed by user
    pub fn rows(&self) -> &[Vec<(usize, f32)>] {
        &self.rows
    }

    /// Every item column, indexed by item
    pub fn cols(&self) -> &[Vec<(usize, f32)>] {
        &self.cols
    }

    pub fn get(&self, user_idx: usize, item_idx: usize) -> Option<f32> {
        let row = self.row(user_idx);
        row.binary_search_by_key(&item_idx, |(i, _)| *i)
            .ok()
            .map(|pos| row[pos].1)
    }

    /// Iterate `(user_idx, item_idx, value)` in row-major order
    pub fn triples(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(u, row)| row.iter().map(move |&(i, v)| (u, i, v)))
    }

    /// Mean value of each item column over all users, absent cells counted as zero
    pub fn item_popularity(&self) -> Vec<f32> {
        let n_users = self.num_users().max(1) as f32;
        self.cols
            .iter()
            .map(|col| col.iter().map(|(_, v)| v).sum::<f32>() / n_users)
            .collect()
    }

    /// Smallest and largest observed cell values
    pub fn value_range(&self) -> (f32, f32) {
        self.triples()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, _, v)| {
                (lo.min(v), hi.max(v))
            })
    }
}
