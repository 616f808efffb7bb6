//! Weight initialisation methods.
//!
//! An [`InitMethod`] fills a freshly allocated `f32` tensor in place. Layers
//! take one as an argument so the caller decides the distribution, e.g.
//! `init_method_normal(args.init_method_std)`.

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::Mutex;

pub type InitMethod = Box<dyn Fn(&mut Tensor<f32>) + Send + Sync>;

fn normal(sigma: f32) -> Result<Normal<f32>> {
    Normal::new(0.0, sigma)
        .map_err(|e| Error::config(format!("invalid init std {sigma}: {e}")))
}

/// Fills tensors with samples from `N(0, sigma^2)` using the thread RNG.
///
/// # Errors
///
/// `Error::Config` if `sigma` is negative or not finite.
pub fn init_method_normal(sigma: f32) -> Result<InitMethod> {
    let dist = normal(sigma)?;
    Ok(Box::new(move |tensor: &mut Tensor<f32>| {
        let mut rng = rand::rng();
        for x in tensor.data_mut() {
            *x = dist.sample(&mut rng);
        }
    }))
}

/// Like [`init_method_normal`], but reproducible: successive calls continue
/// one stream seeded with `seed`.
pub fn init_method_normal_seeded(sigma: f32, seed: u64) -> Result<InitMethod> {
    let dist = normal(sigma)?;
    let rng = Mutex::new(StdRng::seed_from_u64(seed));
    Ok(Box::new(move |tensor: &mut Tensor<f32>| {
        let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for x in tensor.data_mut() {
            *x = dist.sample(&mut *rng);
        }
    }))
}

/// Fills tensors with zeros.
pub fn zeros_init() -> InitMethod {
    Box::new(|tensor: &mut Tensor<f32>| tensor.fill(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_statistics() {
        let init = init_method_normal(0.02).unwrap();
        let mut t = Tensor::<f32>::zeros(&[100, 100]);
        init(&mut t);

        let n = t.numel() as f32;
        let mean = t.data().iter().sum::<f32>() / n;
        let var = t.data().iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-3, "mean {mean}");
        assert!((var.sqrt() - 0.02).abs() < 2e-3, "std {}", var.sqrt());
        assert!(t.data().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = Tensor::<f32>::zeros(&[8]);
        let mut b = Tensor::<f32>::zeros(&[8]);
        init_method_normal_seeded(1.0, 7).unwrap()(&mut a);
        init_method_normal_seeded(1.0, 7).unwrap()(&mut b);
        assert_eq!(a, b);

        // The stream continues across calls.
        let init = init_method_normal_seeded(1.0, 7).unwrap();
        let mut first = Tensor::<f32>::zeros(&[8]);
        let mut second = Tensor::<f32>::zeros(&[8]);
        init(&mut first);
        init(&mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_sigma_is_rejected() {
        assert!(matches!(init_method_normal(f32::NAN), Err(Error::Config(_))));
        assert!(matches!(init_method_normal_seeded(-1.0, 0), Err(Error::Config(_))));
    }

    #[test]
    fn test_zeros_init() {
        let mut t = Tensor::<f32>::ones(&[4]);
        zeros_init()(&mut t);
        assert_eq!(t.data(), &[0.0; 4]);
    }
}
