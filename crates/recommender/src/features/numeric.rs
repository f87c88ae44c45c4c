use crate::config::NumericNormalization;
use crate::types::ItemRecord;
use ndarray::{Array2, Axis};

/// Fixed-width numeric block: popularity first, then the item's own numeric
/// features in key order, zero-padded or truncated to `width`
pub fn raw_numeric_block(items: &[&ItemRecord], width: usize) -> Array2<f32> {
    let mut block = Array2::<f32>::zeros((items.len(), width));
    for (row, item) in items.iter().enumerate() {
        let values = std::iter::once(item.popularity_score)
            .chain(item.numeric_features.values().copied())
            .take(width);
        for (col, value) in values.enumerate() {
            block[[row, col]] = if value.is_finite() { value } else { 0.0 };
        }
    }
    block
}

pub fn column_names(width: usize) -> Vec<String> {
    (0..width)
        .map(|i| {
            if i == 0 {
                "popularity".to_string()
            } else {
                format!("numeric_{i}")
            }
        })
        .collect()
}

/// Normalize every column in place, fitted on the block itself
pub fn normalize(block: &mut Array2<f32>, method: NumericNormalization) {
    if block.nrows() == 0 {
        return;
    }

    for mut column in block.axis_iter_mut(Axis(1)) {
        match method {
            NumericNormalization::ZScore => {
                let n = column.len() as f32;
                let mean = column.sum() / n;
                let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
                let std = variance.sqrt();
                let scale = if std > 0.0 { std } else { 1.0 };
                column.mapv_inplace(|v| (v - mean) / scale);
            }
            NumericNormalization::MinMax => {
                let min = column.iter().copied().fold(f32::INFINITY, f32::min);
                let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let range = max - min;
                if range > 0.0 {
                    column.mapv_inplace(|v| (v - min) / range);
                } else {
                    column.fill(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_block_layout() {
        let a = ItemRecord::new(Uuid::from_u128(1), "a")
            .with_popularity(5.0)
            .with_numeric_feature("year", 2001.0)
            .with_numeric_feature("duration", 90.0);
        let b = ItemRecord::new(Uuid::from_u128(2), "b").with_popularity(1.0);

        let block = raw_numeric_block(&[&a, &b], 3);
        assert_eq!(block.shape(), &[2, 3]);
        // keys in sorted order: duration, year
        assert_eq!(block.row(0).to_vec(), vec![5.0, 90.0, 2001.0]);
        assert_eq!(block.row(1).to_vec(), vec![1.0, 0.0, 0.0]);

        let truncated = raw_numeric_block(&[&a], 2);
        assert_eq!(truncated.row(0).to_vec(), vec![5.0, 90.0]);
    }

    #[test]
    fn test_z_score() {
        let mut block = ndarray::array![[1.0_f32, 3.0], [3.0, 3.0]];
        normalize(&mut block, NumericNormalization::ZScore);
        assert!((block[[0, 0]] + 1.0).abs() < 1e-6);
        assert!((block[[1, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(block[[0, 1]], 0.0);
    }

    #[test]
    fn test_min_max() {
        let mut block = ndarray::array![[2.0_f32, 7.0], [4.0, 7.0], [3.0, 7.0]];
        normalize(&mut block, NumericNormalization::MinMax);
        assert_eq!(block.column(0).to_vec(), vec![0.0, 1.0, 0.5]);
        assert_eq!(block.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_names(3), vec!["popularity", "numeric_1", "numeric_2"]);
    }
}
