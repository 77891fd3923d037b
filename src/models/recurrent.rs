//! Convolutional + bidirectional LSTM encoder for the mel surface
//!
//! Four conv blocks (BatchNorm + LeakyReLU) shrink the standardized mel
//! surface; the frequency axis is then pooled to a fixed `(steps, width)`
//! grid and read by a stacked bidirectional LSTM. The branch output is the
//! top layer's state at the final time step, forward and backward
//! concatenated.

use candle_core::{Module, Tensor};
use candle_nn::rnn::{lstm, Direction, LSTMConfig, LSTM, RNN};
use candle_nn::{batch_norm, conv2d, BatchNorm, Conv2d, Conv2dConfig, Init, ModuleT, VarBuilder};

use super::branch::BranchEncoder;
use super::config::ConvRecurrentConfig;
use super::ops::{adaptive_avg_pool2d, leaky_relu, BN_EPS};
use crate::error::{Result, ShieldError};

/// Stacked bidirectional LSTM, batch-first
///
/// Every layer holds a forward LSTM and a `_reverse` LSTM. The reverse one
/// reads the time-flipped sequence and its outputs are flipped back, so
/// step `t` of the result joins both directions at the same position.
pub struct BiLstm {
    layers: Vec<(LSTM, LSTM)>,
    hidden_size: usize,
}

fn lstm_config(hidden_size: usize, layer_idx: usize, direction: Direction) -> LSTMConfig {
    let bound = 1.0 / (hidden_size as f64).sqrt();
    let init = Init::Uniform {
        lo: -bound,
        up: bound,
    };
    LSTMConfig {
        w_ih_init: init,
        w_hh_init: init,
        b_ih_init: Some(init),
        b_hh_init: Some(init),
        layer_idx,
        direction,
        ..Default::default()
    }
}

/// Flip a [B, T, ..] tensor along the time axis
fn reverse_time(x: &Tensor) -> Result<Tensor> {
    let steps = x.dim(1)?;
    let index: Vec<u32> = (0..steps as u32).rev().collect();
    let index = Tensor::from_vec(index, steps, x.device())?;
    Ok(x.index_select(&index, 1)?)
}

/// Hidden state of every step: [B, T, H]
fn run_lstm(lstm: &LSTM, x: &Tensor) -> Result<Tensor> {
    let states = lstm.seq(x)?;
    Ok(lstm.states_to_tensor(&states)?)
}

impl BiLstm {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for layer in 0..num_layers {
            let in_size = if layer == 0 {
                input_size
            } else {
                2 * hidden_size
            };
            layers.push((
                lstm(
                    in_size,
                    hidden_size,
                    lstm_config(hidden_size, layer, Direction::Forward),
                    vb.clone(),
                )?,
                lstm(
                    in_size,
                    hidden_size,
                    lstm_config(hidden_size, layer, Direction::Backward),
                    vb.clone(),
                )?,
            ));
        }
        Ok(Self {
            layers,
            hidden_size,
        })
    }

    /// [B, T, in] -> [B, T, 2H]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut seq = x.clone();
        for (fwd, bwd) in &self.layers {
            let forward = run_lstm(fwd, &seq)?;
            let backward = reverse_time(&run_lstm(bwd, &reverse_time(&seq)?)?)?;
            seq = Tensor::cat(&[forward, backward], 2)?;
        }
        Ok(seq)
    }

    pub fn output_dim(&self) -> usize {
        2 * self.hidden_size
    }
}

struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

/// Mel surface encoder: conv blocks -> adaptive pool -> BiLSTM -> last step
pub struct ConvRecurrentBranch {
    name: String,
    blocks: Vec<ConvBlock>,
    lstm: BiLstm,
    pooled_shape: (usize, usize),
    leaky_slope: f64,
}

impl ConvRecurrentBranch {
    pub fn new(name: &str, config: &ConvRecurrentConfig, vb: VarBuilder) -> Result<Self> {
        if config.channels.is_empty() || config.num_layers == 0 {
            return Err(ShieldError::Config(format!(
                "{} needs at least one conv block and one LSTM layer",
                name
            )));
        }
        let mut blocks = Vec::with_capacity(config.channels.len());
        let mut in_channels = 1;
        for (i, &out_channels) in config.channels.iter().enumerate() {
            let kernel = if i == 0 { config.first_kernel } else { 3 };
            let conv_cfg = Conv2dConfig {
                padding: kernel / 2,
                ..Default::default()
            };
            blocks.push(ConvBlock {
                conv: conv2d(
                    in_channels,
                    out_channels,
                    kernel,
                    conv_cfg,
                    vb.pp(format!("conv{}", i + 1)),
                )?,
                bn: batch_norm(out_channels, BN_EPS, vb.pp(format!("bn{}", i + 1)))?,
            });
            in_channels = out_channels;
        }

        let lstm = BiLstm::new(
            config.sequence_dim(),
            config.hidden_size,
            config.num_layers,
            vb.pp("lstm"),
        )?;

        Ok(Self {
            name: name.to_string(),
            blocks,
            lstm,
            pooled_shape: config.pooled_shape,
            leaky_slope: config.leaky_slope,
        })
    }

    /// Smallest surface side that survives the fixed 2x2 pools
    fn min_side(&self) -> usize {
        1 << (self.blocks.len() - 1)
    }
}

impl BranchEncoder for ConvRecurrentBranch {
    fn encode(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, c, h, w) = x.dims4()?;
        let min = self.min_side();
        if c != 1 || h < min || w < min {
            return Err(ShieldError::shape(
                format!("{} input", self.name),
                format!("[_, 1, >={}, >={}]", min, min),
                x.dims().to_vec(),
            ));
        }

        let last = self.blocks.len() - 1;
        let mut hidden = x.clone();
        for (i, block) in self.blocks.iter().enumerate() {
            hidden = block.bn.forward_t(&block.conv.forward(&hidden)?, false)?;
            hidden = leaky_relu(&hidden, self.leaky_slope)?;
            hidden = if i < last {
                hidden.avg_pool2d(2)?
            } else {
                adaptive_avg_pool2d(&hidden, self.pooled_shape)?
            };
        }

        // [B, C, steps, width] -> [B, steps, C * width]
        let (_, channels, steps, width) = hidden.dims4()?;
        let seq = hidden
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((batch, steps, channels * width))?;

        let out = self.lstm.forward(&seq)?;
        Ok(out.narrow(1, steps - 1, 1)?.squeeze(1)?)
    }

    fn output_dim(&self) -> usize {
        self.lstm.output_dim()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use std::collections::HashMap;

    fn sig(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    /// One-unit LSTM with no recurrent weights, identical in both directions
    fn single_unit_lstm(w_ih: [f32; 4], bias: [f32; 4]) -> BiLstm {
        let dev = Device::Cpu;
        let mut tensors = HashMap::new();
        for suffix in ["l0", "l0_reverse"] {
            tensors.insert(
                format!("weight_ih_{}", suffix),
                Tensor::new(&w_ih, &dev).unwrap().reshape((4, 1)).unwrap(),
            );
            tensors.insert(
                format!("weight_hh_{}", suffix),
                Tensor::zeros((4, 1), DType::F32, &dev).unwrap(),
            );
            tensors.insert(
                format!("bias_ih_{}", suffix),
                Tensor::new(&bias, &dev).unwrap(),
            );
            tensors.insert(
                format!("bias_hh_{}", suffix),
                Tensor::zeros(4, DType::F32, &dev).unwrap(),
            );
        }
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &dev);
        BiLstm::new(1, 1, 1, vb).unwrap()
    }

    #[test]
    fn test_lstm_recurrence_matches_hand_computation() {
        let w = [1.0f32, 0.5, -0.7, 0.3];
        let b = [0.5f32, -0.3, 0.8, 0.2];
        let bilstm = single_unit_lstm(w, b);
        let (xa, xb) = (0.9f32, -0.4);
        let x = Tensor::new(&[[[xa], [xb]]], &Device::Cpu).unwrap();
        let out = bilstm.forward(&x).unwrap();
        assert_eq!(out.dims(), &[1, 2, 2]);

        // Gate order: input, forget, cell, output
        let step = |x: f32, c: f32| {
            let i = sig(w[0] * x + b[0]);
            let f = sig(w[1] * x + b[1]);
            let g = (w[2] * x + b[2]).tanh();
            let o = sig(w[3] * x + b[3]);
            let c = f * c + i * g;
            (o * c.tanh(), c)
        };
        let (fwd0, c) = step(xa, 0.0);
        let (fwd1, _) = step(xb, c);
        let (bwd1, c) = step(xb, 0.0);
        let (bwd0, _) = step(xa, c);

        // Position 0: forward saw one input, backward saw both
        let v = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((v[0] - fwd0).abs() < 1e-6);
        assert!((v[1] - bwd0).abs() < 1e-6);
        assert!((v[2] - fwd1).abs() < 1e-6);
        assert!((v[3] - bwd1).abs() < 1e-6);
    }

    #[test]
    fn test_branch_output_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = ConvRecurrentConfig {
            channels: vec![2, 3, 4, 5],
            first_kernel: 5,
            pooled_shape: (4, 2),
            hidden_size: 3,
            num_layers: 2,
            leaky_slope: 0.01,
        };
        let branch = ConvRecurrentBranch::new("mel_branch", &config, vb).unwrap();
        assert_eq!(branch.output_dim(), 6);

        let x = Tensor::randn(0f32, 1.0, (1, 1, 16, 20), &Device::Cpu).unwrap();
        let y = branch.encode(&x).unwrap();
        assert_eq!(y.dims(), &[1, 6]);

        let tiny = Tensor::zeros((1, 1, 4, 20), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            branch.encode(&tiny),
            Err(ShieldError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_lstm_weight_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BiLstm::new(4, 3, 2, vb.pp("lstm")).unwrap();
        let data = varmap.data().lock().unwrap();
        for name in [
            "lstm.weight_ih_l0",
            "lstm.weight_hh_l0_reverse",
            "lstm.bias_ih_l1",
            "lstm.bias_hh_l1_reverse",
        ] {
            assert!(data.contains_key(name), "{}", name);
        }
        assert_eq!(data["lstm.weight_ih_l1"].dims(), &[12, 6]);
    }
}
