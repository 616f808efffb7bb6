use super::Optimizer;
use crate::error::Result;
use crate::nn::Parameter;
use crate::tensor::{DynTensor, TensorError};
use rayon::prelude::*;

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// Updates parameters using the rule:
/// `param = param - learning_rate * grad`
///
/// The arithmetic runs in `f32` and the result is written back in the
/// parameter's own dtype, so reduced-precision parameters stay reduced.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }

    /// Applies one update to a single parameter.
    pub fn update(&self, param: &mut Parameter) -> Result<()> {
        let Some(grad) = param.grad() else {
            return Ok(());
        };
        if grad.shape() != param.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: param.shape().to_vec(),
                got: grad.shape().to_vec(),
            }
            .into());
        }
        let dtype = param.dtype();
        if !dtype.is_floating_point() {
            return Err(TensorError::Unsupported(format!("SGD update of a {dtype} parameter")).into());
        }

        let grad = grad.to_f32();
        let mut values = param.data().to_f32();
        let lr = self.learning_rate;
        values
            .data_mut()
            .par_iter_mut()
            .zip(grad.data().par_iter())
            .for_each(|(p, g)| {
                *p -= lr * *g;
            });
        param.set_data(DynTensor::from_f32(values, dtype));
        Ok(())
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()> {
        for param in params.iter_mut() {
            self.update(param)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Tensor};

    #[test]
    fn test_sgd_update() {
        let sgd = Sgd::new(0.1);
        let mut param = Parameter::new(Tensor::new(vec![1.0f32, 2.0], &[2]).unwrap());
        param.set_grad(Some(DynTensor::F32(Tensor::new(vec![0.5, -0.5], &[2]).unwrap())));

        sgd.update(&mut param).unwrap();

        // [1.0, 2.0] - 0.1 * [0.5, -0.5]
        let values = param.data().to_f32();
        assert!((values.data()[0] - 0.95).abs() < 1e-6);
        assert!((values.data()[1] - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_step_skips_params_without_grad() {
        let mut sgd = Sgd::new(1.0);
        let mut a = Parameter::new(Tensor::<f32>::ones(&[2]));
        let mut b = Parameter::new(Tensor::<f32>::ones(&[2]));
        b.set_grad(Some(DynTensor::F32(Tensor::ones(&[2]))));

        sgd.step(&mut [&mut a, &mut b]).unwrap();
        assert_eq!(a.data().to_f32().data(), &[1.0, 1.0]);
        assert_eq!(b.data().to_f32().data(), &[0.0, 0.0]);
    }

    #[test]
    fn test_update_keeps_reduced_dtype() {
        let sgd = Sgd::new(0.5);
        let mut param = Parameter::new(Tensor::<f32>::ones(&[3]));
        param.to_dtype(DType::BF16);
        param.set_grad(Some(DynTensor::F32(Tensor::ones(&[3]))));

        sgd.update(&mut param).unwrap();
        assert_eq!(param.dtype(), DType::BF16);
        assert_eq!(param.data().to_f32().data(), &[0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_shape_mismatch() {
        let sgd = Sgd::new(0.1);
        let mut param = Parameter::new(Tensor::<f32>::ones(&[2]));
        param.set_grad(Some(DynTensor::F32(Tensor::ones(&[3]))));
        assert!(sgd.update(&mut param).is_err());
    }
}
