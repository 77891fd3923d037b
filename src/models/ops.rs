//! Tensor helpers shared by the branch encoders

use candle_core::{Tensor, D};

use crate::error::{Result, ShieldError};

/// BatchNorm epsilon used by the deployed models
pub const BN_EPS: f64 = 1e-5;

/// Lower bound on the norm when L2-normalizing
pub const L2_EPS: f64 = 1e-12;

/// ReLU activation function
pub fn relu(x: &Tensor) -> Result<Tensor> {
    let zeros = x.zeros_like()?;
    Ok(x.maximum(&zeros)?)
}

/// Leaky ReLU with the given negative slope (< 1)
pub fn leaky_relu(x: &Tensor, slope: f64) -> Result<Tensor> {
    let scaled = (x * slope)?;
    Ok(x.maximum(&scaled)?)
}

/// Sigmoid activation function
pub fn sigmoid(x: &Tensor) -> Result<Tensor> {
    // sigmoid(x) = 1 / (1 + exp(-x))
    let neg_x = x.neg()?;
    let exp_neg_x = neg_x.exp()?;
    let one_plus = (exp_neg_x + 1.0)?;
    Ok(one_plus.recip()?)
}

/// Divide each row of a [batch, dim] tensor by `max(||row||, L2_EPS)`
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x
        .sqr()?
        .sum_keepdim(D::Minus1)?
        .sqrt()?
        .maximum(L2_EPS)?;
    Ok(x.broadcast_div(&norm)?)
}

/// Adaptive average pooling of a [batch, channels, h, w] tensor to `(oh, ow)`
///
/// Output cell `i` averages input rows `floor(i*h/oh) .. ceil((i+1)*h/oh)`,
/// so the output size is exact whether the input is larger or smaller.
pub fn adaptive_avg_pool2d(x: &Tensor, output: (usize, usize)) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let (oh, ow) = output;
    if oh == 0 || ow == 0 || h == 0 || w == 0 {
        return Err(ShieldError::shape("adaptive pool", output, (h, w)));
    }
    let rows = pool_axis(x, 2, h, oh)?;
    pool_axis(&rows, 3, w, ow)
}

fn pool_axis(x: &Tensor, dim: usize, input: usize, output: usize) -> Result<Tensor> {
    let cells = (0..output)
        .map(|i| {
            let start = i * input / output;
            let end = ((i + 1) * input).div_ceil(output);
            Ok(x.narrow(dim, start, end - start)?.mean_keepdim(dim)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&cells, dim)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_relu_and_leaky() {
        let x = Tensor::new(&[-2.0f32, 0.0, 3.0], &Device::Cpu).unwrap();
        assert_eq!(relu(&x).unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 0.0, 3.0]);
        let y = leaky_relu(&x, 0.01).unwrap().to_vec1::<f32>().unwrap();
        assert!((y[0] + 0.02).abs() < 1e-6);
        assert_eq!(y[2], 3.0);
    }

    #[test]
    fn test_sigmoid() {
        let x = Tensor::new(&[0.0f32, 100.0, -100.0], &Device::Cpu).unwrap();
        let y = sigmoid(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!((y[0] - 0.5).abs() < 1e-6);
        assert!((y[1] - 1.0).abs() < 1e-6);
        assert!(y[2] >= 0.0 && y[2] < 1e-6);
    }

    #[test]
    fn test_l2_normalize_rows() {
        let x = Tensor::new(&[[3.0f32, 4.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let y = l2_normalize(&x).unwrap().to_vec2::<f32>().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-6);
        assert!((y[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(y[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_adaptive_pool_downsamples_by_mean() {
        let x = Tensor::arange(0f32, 16.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap();
        let y = adaptive_avg_pool2d(&x, (2, 2)).unwrap();
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(v, vec![2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_adaptive_pool_upsamples_by_repetition() {
        let x = Tensor::new(&[1.0f32, 2.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 2, 1))
            .unwrap();
        let y = adaptive_avg_pool2d(&x, (4, 2)).unwrap();
        assert_eq!(y.dims(), &[1, 1, 4, 2]);
        let v = y.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(v, vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]);
    }
}
