//! Dense fusion head over concatenated branch outputs

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use super::config::FusionConfig;
use super::ops::{l2_normalize, relu, sigmoid};
use crate::error::{Result, ShieldError};

/// How the last projection is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOutput {
    /// Sigmoid to a probability in [0, 1]
    Probability,
    /// Raw projection, optionally scaled to unit L2 norm
    Embedding { l2_normalize: bool },
}

/// Hidden Linear+ReLU layers followed by one output projection
///
/// Hidden layers are read from `{hidden_prefix}.{3 * i}`; the stride of 3
/// skips the activation and dropout slots of the checkpoint's sequential
/// container.
pub struct FusionHead {
    hidden: Vec<Linear>,
    output: Linear,
    input_dim: usize,
    output_dim: usize,
}

impl FusionHead {
    pub fn new(
        config: &FusionConfig,
        hidden_prefix: &str,
        output_name: &str,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden_vb = vb.pp(hidden_prefix);
        let mut hidden = Vec::with_capacity(config.hidden_dims.len());
        let mut width = config.input_dim;
        for (i, &dim) in config.hidden_dims.iter().enumerate() {
            hidden.push(linear(width, dim, hidden_vb.pp((3 * i).to_string()))?);
            width = dim;
        }
        let output = linear(width, config.output_dim, vb.pp(output_name))?;

        Ok(Self {
            hidden,
            output,
            input_dim: config.input_dim,
            output_dim: config.output_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// [B, input_dim] -> [B, output_dim]
    pub fn forward(&self, fused: &Tensor, mode: FusionOutput) -> Result<Tensor> {
        let (_, width) = fused.dims2()?;
        if width != self.input_dim {
            return Err(ShieldError::shape("fusion input", self.input_dim, width));
        }
        let mut x = fused.clone();
        for layer in &self.hidden {
            x = relu(&layer.forward(&x)?)?;
        }
        let x = self.output.forward(&x)?;
        match mode {
            FusionOutput::Probability => sigmoid(&x),
            FusionOutput::Embedding { l2_normalize: true } => l2_normalize(&x),
            FusionOutput::Embedding { l2_normalize: false } => Ok(x),
        }
    }
}
