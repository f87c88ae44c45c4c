//! Cosine similarity and deterministic ranking helpers

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Cosine similarity, `None` when either vector has zero norm or lengths differ
pub fn cosine(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let dot = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let sim = dot / (norm_a * norm_b);
    sim.is_finite().then_some(sim)
}

pub fn cosine_slices(a: &[f32], b: &[f32]) -> Option<f32> {
    cosine(ArrayView1::from(a), ArrayView1::from(b))
}

/// Descending by score, ties broken by ascending id
pub fn by_score_desc(a: &(Uuid, f32), b: &(Uuid, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

pub fn sort_scored(scored: &mut [(Uuid, f32)]) {
    scored.sort_by(by_score_desc);
}

pub fn top_k(mut scored: Vec<(Uuid, f32)>, k: usize) -> Vec<(Uuid, f32)> {
    sort_scored(&mut scored);
    scored.truncate(k);
    scored
}

/// Cosine of two sparse vectors given as `(dimension, value)` pairs sorted by dimension
pub fn sparse_cosine(a: &[(usize, f32)], b: &[(usize, f32)]) -> Option<f32> {
    let norm_a = sparse_norm(a);
    let norm_b = sparse_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let (mut x, mut y, mut dot) = (0, 0, 0.0_f32);
    while x < a.len() && y < b.len() {
        match a[x].0.cmp(&b[y].0) {
            Ordering::Less => x += 1,
            Ordering::Greater => y += 1,
            Ordering::Equal => {
                dot += a[x].1 * b[y].1;
                x += 1;
                y += 1;
            }
        }
    }

    let sim = dot / (norm_a * norm_b);
    sim.is_finite().then_some(sim)
}

fn sparse_norm(v: &[(usize, f32)]) -> f32 {
    v.iter().map(|(_, x)| x * x).sum::<f32>().sqrt()
}

/// Top-k cosine neighbors per row of a sparse matrix
///
/// Only positive similarities are kept, best first with ties broken by ascending
/// row index. Rows that share no dimension with any other row have no neighbors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    ids: Vec<Uuid>,
    k: usize,
    neighbors: Vec<Vec<(usize, f32)>>,
}

impl SimilarityMatrix {
    /// `rows[i]` is the vector labelled `ids[i]` as `(dimension, value)` pairs and
    /// `columns[d]` lists the `(row, value)` pairs of dimension `d`
    ///
    /// Dot products are accumulated only over co-occurring rows, so cost follows
    /// the number of shared dimensions rather than the square of the row count.
    pub fn from_adjacency(
        rows: &[Vec<(usize, f32)>],
        columns: &[Vec<(usize, f32)>],
        ids: Vec<Uuid>,
        k: usize,
    ) -> Self {
        debug_assert_eq!(rows.len(), ids.len());

        let norms: Vec<f32> = rows.iter().map(|row| sparse_norm(row)).collect();
        let mut dots: HashMap<usize, f32> = HashMap::new();
        let mut neighbors = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            dots.clear();
            if norms[i] > 0.0 {
                for &(d, a) in row {
                    let column = columns.get(d).map(Vec::as_slice).unwrap_or(&[]);
                    for &(j, b) in column.iter().filter(|(j, _)| *j != i) {
                        *dots.entry(j).or_insert(0.0) += a * b;
                    }
                }
            }

            let mut kept: Vec<(usize, f32)> = dots
                .iter()
                .filter_map(|(&j, &dot)| {
                    let denom = norms[i] * norms.get(j).copied().unwrap_or(0.0);
                    if denom <= 0.0 {
                        return None;
                    }
                    let sim = dot / denom;
                    (sim.is_finite() && sim > 0.0).then_some((j, sim))
                })
                .collect();
            kept.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            kept.truncate(k);
            neighbors.push(kept);
        }

        Self { ids, k, neighbors }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    /// Neighbors kept per row
    pub fn k(&self) -> usize {
        self.k
    }

    /// Similarity of `j` to `i`, `None` unless `j` is one of the kept neighbors of `i`
    pub fn get(&self, i: usize, j: usize) -> Option<f32> {
        self.neighbors
            .get(i)?
            .iter()
            .find(|(n, _)| *n == j)
            .map(|(_, s)| *s)
    }

    /// Up to `k` neighbors of row `i`, best first
    pub fn neighbors(&self, i: usize, k: usize) -> Vec<(usize, f32)> {
        self.neighbors
            .get(i)
            .map(|row| row.iter().take(k).copied().collect())
            .unwrap_or_default()
    }

    /// Total stored neighbor entries
    pub fn nnz(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine() {
        let a = array![1.0_f32, 0.0, 0.0];
        let b = array![0.0_f32, 1.0, 0.0];
        let c = array![2.0_f32, 0.0, 0.0];
        let zero = array![0.0_f32, 0.0, 0.0];

        assert!(cosine(a.view(), b.view()).unwrap().abs() < 1e-6);
        assert!((cosine(a.view(), c.view()).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(cosine(a.view(), zero.view()), None);
        assert_eq!(cosine_slices(&[1.0, 2.0], &[1.0]), None);
    }

    #[test]
    fn test_ranking_tie_break() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let ranked = top_k(vec![(high, 0.5), (low, 0.5), (Uuid::from_u128(3), 0.9)], 2);
        assert_eq!(ranked, vec![(Uuid::from_u128(3), 0.9), (low, 0.5)]);
    }

    /// Rows as `(dimension, value)` lists plus the transposed column lists
    fn adjacency(dense: &[&[f32]]) -> (Vec<Vec<(usize, f32)>>, Vec<Vec<(usize, f32)>>) {
        let dims = dense.first().map_or(0, |r| r.len());
        let mut rows = vec![Vec::new(); dense.len()];
        let mut columns = vec![Vec::new(); dims];
        for (i, row) in dense.iter().enumerate() {
            for (d, &v) in row.iter().enumerate().filter(|(_, v)| **v != 0.0) {
                rows[i].push((d, v));
                columns[d].push((i, v));
            }
        }
        (rows, columns)
    }

    fn ids(n: u128) -> Vec<Uuid> {
        (1..=n).map(Uuid::from_u128).collect()
    }

    #[test]
    fn test_matrix_skips_zero_rows_and_self() {
        let (rows, columns) = adjacency(&[&[1.0, 1.0], &[1.0, 0.0], &[0.0, 0.0]]);
        let matrix = SimilarityMatrix::from_adjacency(&rows, &columns, ids(3), 10);

        assert_eq!(matrix.get(0, 2), None);
        assert_eq!(matrix.get(2, 2), None);
        assert!((matrix.get(0, 1).unwrap() - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        let neighbors = matrix.neighbors(0, 10);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0, 1);
        assert!(matrix.neighbors(2, 10).is_empty());
    }

    #[test]
    fn test_matrix_keeps_top_k_per_row() {
        let (rows, columns) = adjacency(&[
            &[1.0, 0.0, 0.0],
            &[1.0, 0.1, 0.0],
            &[1.0, 1.0, 0.0],
            &[1.0, 1.0, 1.0],
            &[0.0, 0.0, 1.0],
        ]);
        let matrix = SimilarityMatrix::from_adjacency(&rows, &columns, ids(5), 2);

        assert_eq!(matrix.k(), 2);
        assert!(matrix.nnz() <= 2 * matrix.len());
        assert_eq!(
            matrix.neighbors(0, 10).iter().map(|(j, _)| *j).collect::<Vec<_>>(),
            vec![1, 2]
        );
        // Row 4 only overlaps row 3
        assert_eq!(matrix.neighbors(4, 10).len(), 1);
        assert_eq!(matrix.get(0, 3), None);
    }

    #[test]
    fn test_sparse_matches_dense_cosine() {
        let a = [(0, 1.0_f32), (2, 2.0)];
        let b = [(1, 3.0_f32), (2, 1.0)];
        let dense = cosine_slices(&[1.0, 0.0, 2.0], &[0.0, 3.0, 1.0]).unwrap();

        assert!((sparse_cosine(&a, &b).unwrap() - dense).abs() < 1e-6);
        assert_eq!(sparse_cosine(&a, &[]), None);
    }
}
