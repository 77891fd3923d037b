//! Dense encoder for time-averaged descriptors

use candle_core::{Module, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, Linear, ModuleT, VarBuilder};

use super::branch::BranchEncoder;
use super::config::DenseBranchConfig;
use super::ops::{relu, BN_EPS};
use crate::error::{Result, ShieldError};

/// Linear -> BatchNorm -> ReLU, applied three times
///
/// Weights live under `fc1`/`bn1` .. `fc3`/`bn3`. Widths go
/// input -> hidden -> hidden -> output. BatchNorm always runs on its
/// running statistics.
pub struct DenseBranch {
    name: String,
    stages: Vec<(Linear, BatchNorm)>,
    input_dim: usize,
    output_dim: usize,
}

impl DenseBranch {
    pub fn new(name: &str, config: &DenseBranchConfig, vb: VarBuilder) -> Result<Self> {
        let widths = [
            (config.input_dim, config.hidden_dim),
            (config.hidden_dim, config.hidden_dim),
            (config.hidden_dim, config.output_dim),
        ];
        let stages = widths
            .iter()
            .enumerate()
            .map(|(i, &(inp, out))| {
                let fc = linear(inp, out, vb.pp(format!("fc{}", i + 1)))?;
                let bn = batch_norm(out, BN_EPS, vb.pp(format!("bn{}", i + 1)))?;
                Ok((fc, bn))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            stages,
            input_dim: config.input_dim,
            output_dim: config.output_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }
}

impl BranchEncoder for DenseBranch {
    fn encode(&self, x: &Tensor) -> Result<Tensor> {
        let (_, width) = x.dims2()?;
        if width != self.input_dim {
            return Err(ShieldError::shape(
                format!("{} input width", self.name),
                self.input_dim,
                width,
            ));
        }
        let mut hidden = x.clone();
        for (fc, bn) in &self.stages {
            hidden = relu(&bn.forward_t(&fc.forward(&hidden)?, false)?)?;
        }
        Ok(hidden)
    }

    fn output_dim(&self) -> usize {
        self.output_dim
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

    fn branch(input_dim: usize) -> DenseBranch {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = DenseBranchConfig {
            input_dim,
            hidden_dim: 16,
            output_dim: 8,
        };
        DenseBranch::new("chroma_branch", &config, vb.pp("chroma_branch")).unwrap()
    }

    #[test]
    fn test_output_is_non_negative() {
        let b = branch(12);
        let x = Tensor::randn(0f32, 1.0, (3, 12), &Device::Cpu).unwrap();
        let y = b.encode(&x).unwrap();
        assert_eq!(y.dims(), &[3, 8]);
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_rejects_wrong_width() {
        let b = branch(12);
        let x = Tensor::zeros((1, 20), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            b.encode(&x),
            Err(ShieldError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_norm_uses_running_statistics() {
        let dev = Device::Cpu;
        let scalar = |v: f32| Tensor::new(&[v], &dev).unwrap();
        let mut tensors = HashMap::new();
        for i in 1..=3 {
            tensors.insert(format!("fc{i}.weight"), Tensor::ones((1, 1), DType::F32, &dev).unwrap());
            tensors.insert(format!("fc{i}.bias"), scalar(0.0));
            tensors.insert(format!("bn{i}.weight"), scalar(1.0));
            tensors.insert(format!("bn{i}.bias"), scalar(0.0));
            tensors.insert(format!("bn{i}.running_mean"), scalar(if i == 3 { 2.0 } else { 0.0 }));
            tensors.insert(format!("bn{i}.running_var"), scalar(1.0));
        }
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &dev);
        let config = DenseBranchConfig {
            input_dim: 1,
            hidden_dim: 1,
            output_dim: 1,
        };
        let b = DenseBranch::new("pitch_branch", &config, vb).unwrap();

        let x = Tensor::new(&[[5.0f32], [1.0]], &dev).unwrap();
        let y = b.encode(&x).unwrap().to_vec2::<f32>().unwrap();
        let expected = 3.0 / (1.0 + BN_EPS as f32).sqrt();
        assert!((y[0][0] - expected).abs() < 1e-5);
        // 1 - 2 < 0 is clipped by the final ReLU
        assert_eq!(y[1][0], 0.0);
    }
}
