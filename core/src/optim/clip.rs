//! Gradient-norm computation and clipping.
//!
//! Tied embeddings exist twice in a pipeline (input table on the first stage,
//! head copy on the last) with identical gradients after synchronisation.
//! Parameters flagged as shared are skipped so the norm counts them once.
//!
//! Clipping must scale every stage by the same factor, otherwise the two
//! copies of a tied weight drift apart. The norm is therefore summed over the
//! model-parallel group before anyone clips.

use crate::distributed::{CollectiveBackend, ParallelState};
use crate::error::Result;
use crate::nn::{param_is_not_shared, Parameter};
use crate::tensor::{DynTensor, Tensor};
use rayon::prelude::*;
use tracing::debug;

const CLIP_EPSILON: f32 = 1e-6;

fn local_sum_of_squares(params: &[&Parameter]) -> f32 {
    params
        .iter()
        .filter(|p| param_is_not_shared(p))
        .filter_map(|p| p.grad())
        .map(|g| g.to_f32().data().par_iter().map(|x| x * x).sum::<f32>())
        .sum()
}

/// L2 norm over the gradients of this worker's non-shared parameters.
///
/// Parameters without a gradient contribute nothing.
pub fn grad_norm(params: &[&Parameter]) -> f32 {
    local_sum_of_squares(params).sqrt()
}

/// L2 norm over the non-shared gradients of the whole model.
///
/// Every stage contributes its local sum of squares to an all-reduce over
/// the model-parallel group, so all stages return the same value. Without a
/// distributed runtime this is [`grad_norm`].
pub fn global_grad_norm<B: CollectiveBackend>(
    params: &[&Parameter],
    state: &ParallelState<B>,
) -> Result<f32> {
    let local = local_sum_of_squares(params);
    if !state.is_distributed_initialized() {
        return Ok(local.sqrt());
    }
    let mut total = Tensor::scalar(local);
    state.model_parallel_group()?.all_reduce_sum(&mut total)?;
    let norm = total.data()[0].sqrt();
    debug!(local = local.sqrt(), global = norm, "gradient norm");
    Ok(norm)
}

/// Rescales every gradient by `max_norm / (norm + 1e-6)` when the global
/// norm exceeds `max_norm`. Shared parameters are scaled too, though they do
/// not count towards the norm. Returns the norm measured before clipping.
///
/// Collective: every stage of the pipeline must call it for the same step.
pub fn clip_grad_norm<B: CollectiveBackend>(
    params: &mut [&mut Parameter],
    max_norm: f32,
    state: &ParallelState<B>,
) -> Result<f32> {
    let norm = {
        let views: Vec<&Parameter> = params.iter().map(|p| &**p).collect();
        global_grad_norm(&views, state)?
    };
    if norm <= max_norm {
        return Ok(norm);
    }

    let scale = max_norm / (norm + CLIP_EPSILON);
    for param in params.iter_mut() {
        if let Some(grad) = param.grad() {
            let dtype = grad.dtype();
            let scaled = grad.to_f32().map(|g| g * scale);
            param.set_grad(Some(DynTensor::from_f32(scaled, dtype)));
        }
    }
    Ok(norm)
}
