//! Parameter updates and gradient-norm utilities.

pub mod clip;
pub mod sgd;

pub use clip::{clip_grad_norm, global_grad_norm, grad_norm};
pub use sgd::Sgd;

use crate::error::Result;
use crate::nn::Parameter;

/// A trait for optimizers.
///
/// Optimizers read each parameter's gradient and update its values in place.
/// Parameters without a gradient are left untouched.
pub trait Optimizer {
    /// Performs a single optimization step.
    ///
    /// # Errors
    ///
    /// Returns an error if a gradient's shape differs from its parameter's.
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()>;
}
