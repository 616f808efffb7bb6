use crate::error::Result;
use crate::tensor::{DynTensor, Tensor, TensorElem, TensorError};

/// Abstraction for a collective communication group.
///
/// A backend value *is* a group: it knows this worker's rank inside the group
/// and the group size, and every collective it runs involves exactly those
/// members. Building one backend per named group (the embedding group, a
/// tensor-parallel group, ...) keeps group membership in the type system
/// instead of in a global registry.
///
/// Collectives are blocking: a call returns only after every member of the
/// group has entered the same collective.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current worker within this group.
    fn rank(&self) -> usize;

    /// Returns the number of workers in this group.
    fn world_size(&self) -> usize;

    /// Sums `tensor` element-wise across the group and writes the result back in place.
    fn all_reduce_sum<T: TensorElem + 'static>(&self, tensor: &mut Tensor<T>) -> Result<()>;

    /// [`all_reduce_sum`](Self::all_reduce_sum) for a runtime-typed tensor.
    ///
    /// Every member must pass the same dtype and shape.
    fn all_reduce_sum_dyn(&self, tensor: &mut DynTensor) -> Result<()> {
        match tensor {
            DynTensor::F32(t) => self.all_reduce_sum(t),
            DynTensor::F16(t) => self.all_reduce_sum(t),
            DynTensor::BF16(t) => self.all_reduce_sum(t),
            DynTensor::I64(t) => self.all_reduce_sum(t),
            DynTensor::Bool(_) => Err(TensorError::Unsupported(
                "all-reduce sum over a bool tensor".to_string(),
            )
            .into()),
        }
    }
}
