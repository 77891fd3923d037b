//! Fixed-geometry reshaping of heterogeneous descriptors
//!
//! Every descriptor is forced into the same `(H, W)` surface by cropping the
//! top-left block and zero-padding the bottom/right. Values are never
//! interpolated.

use candle_core::{Device, Tensor};

use super::FeatureMatrix;
use crate::error::{Result, ShieldError};

/// A descriptor reshaped to exactly the pipeline's target shape
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedFeature {
    matrix: FeatureMatrix,
}

impl StandardizedFeature {
    pub fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }

    pub fn matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }

    /// Tensor of shape (1, H, W); the leading axis is the channel
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(self.matrix.to_tensor(device)?.unsqueeze(0)?)
    }

    /// Per-row mean over the padded width
    pub fn time_average(&self) -> Vec<f32> {
        time_average(&self.matrix)
    }
}

/// Crop to at most `target`, then zero-pad to exactly `target`
pub fn standardize(feature: &FeatureMatrix, target: (usize, usize)) -> Result<StandardizedFeature> {
    let (h, w) = target;
    if h == 0 || w == 0 {
        return Err(ShieldError::shape("standardize target", "non-empty (H, W)", target));
    }
    if feature.shape() == target {
        return Ok(StandardizedFeature {
            matrix: feature.clone(),
        });
    }

    let keep_rows = feature.rows().min(h);
    let keep_cols = feature.cols().min(w);
    let mut data = vec![0.0f32; h * w];
    for r in 0..keep_rows {
        data[r * w..r * w + keep_cols].copy_from_slice(&feature.row(r)[..keep_cols]);
    }

    Ok(StandardizedFeature {
        matrix: FeatureMatrix::new(h, w, data)?,
    })
}

/// Promote a 1-D series to a single row and standardize it
pub fn standardize_series(values: &[f32], target: (usize, usize)) -> Result<StandardizedFeature> {
    standardize(&FeatureMatrix::from_row(values), target)
}

/// Mean of each row across frames
pub fn time_average(feature: &FeatureMatrix) -> Vec<f32> {
    feature.row_means()
}
