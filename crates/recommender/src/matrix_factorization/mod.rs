//! Matrix Factorization
//!
//! Two latent factor models over the interaction matrix:
//! - [`svd::SvdScorer`]: explicit feedback, biased SGD
//! - [`als::AlsScorer`]: implicit feedback, alternating least squares with confidence weights

pub mod als;
pub mod svd;

use crate::error::ScorerError;
use crate::index::IndexMapping;
use crate::similarity::{cosine, top_k};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;
use uuid::Uuid;

pub use als::AlsScorer;
pub use svd::SvdScorer;

/// Trained user and item latent factors with their id mappings
#[derive(Debug, Clone)]
pub struct LatentFactors {
    pub users: IndexMapping,
    pub items: IndexMapping,
    /// [num_users x factors]
    pub user_factors: Array2<f32>,
    /// [num_items x factors]
    pub item_factors: Array2<f32>,
}

impl LatentFactors {
    pub fn factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn user_embedding(&self, user_id: &Uuid) -> Option<ArrayView1<f32>> {
        self.users
            .index_of(user_id)
            .map(|idx| self.user_factors.row(idx))
    }

    pub fn item_embedding(&self, item_id: &Uuid) -> Option<ArrayView1<f32>> {
        self.items
            .index_of(item_id)
            .map(|idx| self.item_factors.row(idx))
    }

    /// Raw latent dot product
    pub fn dot(&self, user_idx: usize, item_idx: usize) -> f32 {
        self.user_factors
            .row(user_idx)
            .dot(&self.item_factors.row(item_idx))
    }

    /// Items closest to `item_id` by cosine over item factors
    pub fn similar_items(&self, item_id: &Uuid, k: usize) -> Result<Vec<(Uuid, f32)>, ScorerError> {
        let target = self
            .items
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;
        let query = self.item_factors.row(target);

        let similar: Vec<(Uuid, f32)> = self
            .items
            .ids()
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != target)
            .filter_map(|(j, id)| {
                cosine(query, self.item_factors.row(j))
                    .filter(|s| *s > 0.0)
                    .map(|s| (*id, s))
            })
            .collect();

        Ok(top_k(similar, k))
    }
}

/// Uniform(-0.1, 0.1) initialization
pub(crate) fn init_factors(rng: &mut StdRng, rows: usize, factors: usize) -> Array2<f32> {
    let mut matrix = Array2::<f32>::zeros((rows, factors));
    for value in matrix.iter_mut() {
        *value = rng.gen_range(-0.1..0.1);
    }
    matrix
}

/// Solve A * x = b using Cholesky decomposition
/// For positive definite matrix A (which regularization guarantees)
pub(crate) fn solve_least_squares(
    a: &Array2<f64>,
    b: &Array1<f64>,
) -> Result<Array1<f64>, ScorerError> {
    let n = a.nrows();

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return Err(ScorerError::Numerical(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Ok(x)
}
