use crate::tensor::{DType, DynTensor};

/// A trainable tensor together with its gradient and bookkeeping flags.
///
/// `shared` marks a parameter that is a *replica* of a parameter owned by
/// another worker (the last stage's copy of the word embeddings). Gradient
/// synchronisation uses it to find the copies it must keep in agreement, and
/// gradient-norm computation uses it to avoid counting the same weights twice.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    data: DynTensor,
    grad: Option<DynTensor>,
    shared: bool,
}

impl Parameter {
    pub fn new(data: impl Into<DynTensor>) -> Self {
        Self {
            data: data.into(),
            grad: None,
            shared: false,
        }
    }

    pub fn data(&self) -> &DynTensor {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DynTensor {
        &mut self.data
    }

    /// Replaces the values, keeping the gradient and flags.
    pub fn set_data(&mut self, data: DynTensor) {
        self.data = data;
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn grad(&self) -> Option<&DynTensor> {
        self.grad.as_ref()
    }

    pub fn grad_mut(&mut self) -> Option<&mut DynTensor> {
        self.grad.as_mut()
    }

    pub fn set_grad(&mut self, grad: Option<DynTensor>) {
        self.grad = grad;
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    /// Casts values and gradient to `dtype`. Non-floating parameters are left as they are.
    pub fn to_dtype(&mut self, dtype: DType) {
        if !self.data.dtype().is_floating_point() {
            return;
        }
        self.data = self.data.to_dtype(dtype);
        if let Some(grad) = self.grad.take() {
            self.grad = Some(grad.to_dtype(dtype));
        }
    }
}

/// `true` unless `param` is flagged as a replica of another worker's parameter.
pub fn param_is_not_shared(param: &Parameter) -> bool {
    !param.is_shared()
}
