//! Dense row-major 2-D array used for every descriptor

use candle_core::{Device, Tensor};

use crate::error::{Result, ShieldError};

/// Row-major `rows x cols` matrix of `f32`
///
/// Rows are channels (mel bands, chroma classes, ...) and columns are frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Wrap row-major data; `data.len()` must equal `rows * cols`
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(ShieldError::shape(
                "feature matrix",
                (rows, cols),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Promote a 1-D series to a single row
    pub fn from_row(values: &[f32]) -> Self {
        Self {
            rows: 1,
            cols: values.len(),
            data: values.to_vec(),
        }
    }

    /// Build from frame-major data (`frames[t][channel]`), transposing to
    /// channel-major rows.
    pub fn from_frames(frames: &[Vec<f32>], channels: usize) -> Self {
        let cols = frames.len();
        let mut data = vec![0.0f32; channels * cols];
        for (t, frame) in frames.iter().enumerate() {
            for (c, &v) in frame.iter().take(channels).enumerate() {
                data[c * cols + t] = v;
            }
        }
        Self {
            rows: channels,
            cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy of one column (one frame across all channels)
    pub fn column(&self, col: usize) -> Vec<f32> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    /// Mean of each row across time; empty rows average to zero
    pub fn row_means(&self) -> Vec<f32> {
        (0..self.rows)
            .map(|r| {
                if self.cols == 0 {
                    0.0
                } else {
                    self.row(r).iter().sum::<f32>() / self.cols as f32
                }
            })
            .collect()
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// `self (rows x k) = weights (rows x k') * other (k' x cols)` with `k' == other.rows`
    pub fn project(weights: &[Vec<f32>], other: &FeatureMatrix) -> Self {
        let rows = weights.len();
        let cols = other.cols;
        let mut out = Self::zeros(rows, cols);
        for (r, w) in weights.iter().enumerate() {
            for (k, &wk) in w.iter().enumerate().take(other.rows) {
                if wk == 0.0 {
                    continue;
                }
                let src = other.row(k);
                let dst = &mut out.data[r * cols..(r + 1) * cols];
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d += wk * s;
                }
            }
        }
        out
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Tensor of shape [rows, cols]
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, (self.rows, self.cols), device)?)
    }
}
