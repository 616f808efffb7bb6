//! Nested value trees: the payload that flows between pipeline stages.
//!
//! A stage's forward call receives positional inputs and returns outputs that
//! may be arbitrarily nested lists and tuples of tensors, e.g.
//! `((hidden, attention_mask), [loss, aux_loss])`. [`ValueTree`] models that
//! as a tagged enum so conversions walk it with a typed visitor instead of
//! inspecting runtime types, and rebuild exactly the container variant they
//! found.

use crate::error::Result;
use crate::tensor::{DynTensor, Tensor};

/// An arbitrarily nested composite of tensors.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTree {
    /// A leaf.
    Tensor(DynTensor),
    /// A growable ordered sequence.
    List(Vec<ValueTree>),
    /// A fixed-arity ordered sequence.
    Tuple(Vec<ValueTree>),
    /// An absent optional value; passes through every transform untouched.
    Null,
}

impl ValueTree {
    pub fn list(items: impl IntoIterator<Item = ValueTree>) -> Self {
        ValueTree::List(items.into_iter().collect())
    }

    pub fn tuple(items: impl IntoIterator<Item = ValueTree>) -> Self {
        ValueTree::Tuple(items.into_iter().collect())
    }

    /// Rebuilds the tree with every tensor leaf replaced by `f(leaf)`.
    ///
    /// Lists stay lists, tuples stay tuples, `Null` stays `Null`, and the
    /// nesting is preserved exactly. The first error from `f` aborts the walk.
    pub fn map_tensors<F>(self, f: &mut F) -> Result<ValueTree>
    where
        F: FnMut(DynTensor) -> Result<DynTensor>,
    {
        match self {
            ValueTree::Tensor(t) => Ok(ValueTree::Tensor(f(t)?)),
            ValueTree::List(items) => Ok(ValueTree::List(Self::map_items(items, f)?)),
            ValueTree::Tuple(items) => Ok(ValueTree::Tuple(Self::map_items(items, f)?)),
            ValueTree::Null => Ok(ValueTree::Null),
        }
    }

    fn map_items<F>(items: Vec<ValueTree>, f: &mut F) -> Result<Vec<ValueTree>>
    where
        F: FnMut(DynTensor) -> Result<DynTensor>,
    {
        items.into_iter().map(|item| item.map_tensors(f)).collect()
    }

    /// Tensor leaves in depth-first, left-to-right order.
    pub fn tensors(&self) -> Vec<&DynTensor> {
        let mut out = Vec::new();
        self.collect_tensors(&mut out);
        out
    }

    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a DynTensor>) {
        match self {
            ValueTree::Tensor(t) => out.push(t),
            ValueTree::List(items) | ValueTree::Tuple(items) => {
                for item in items {
                    item.collect_tensors(out);
                }
            }
            ValueTree::Null => {}
        }
    }

    /// `true` if both trees have the same containers, arities and leaf
    /// positions. Leaf values and dtypes are not compared.
    pub fn same_structure(&self, other: &ValueTree) -> bool {
        match (self, other) {
            (ValueTree::Tensor(a), ValueTree::Tensor(b)) => a.shape() == b.shape(),
            (ValueTree::List(a), ValueTree::List(b)) | (ValueTree::Tuple(a), ValueTree::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            (ValueTree::Null, ValueTree::Null) => true,
            _ => false,
        }
    }

    pub fn as_tensor(&self) -> Option<&DynTensor> {
        match self {
            ValueTree::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Children of a list or tuple; `None` for leaves.
    pub fn items(&self) -> Option<&[ValueTree]> {
        match self {
            ValueTree::List(items) | ValueTree::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// The first tensor leaf, which by convention is a stage's primary input.
    pub fn first_tensor(&self) -> Option<&DynTensor> {
        match self {
            ValueTree::Tensor(t) => Some(t),
            ValueTree::List(items) | ValueTree::Tuple(items) => {
                items.iter().find_map(ValueTree::first_tensor)
            }
            ValueTree::Null => None,
        }
    }
}

impl From<DynTensor> for ValueTree {
    fn from(t: DynTensor) -> Self {
        ValueTree::Tensor(t)
    }
}

impl From<Tensor<f32>> for ValueTree {
    fn from(t: Tensor<f32>) -> Self {
        ValueTree::Tensor(DynTensor::F32(t))
    }
}

impl From<Tensor<i64>> for ValueTree {
    fn from(t: Tensor<i64>) -> Self {
        ValueTree::Tensor(DynTensor::I64(t))
    }
}

/// A full-precision scalar leaf.
impl From<f32> for ValueTree {
    fn from(v: f32) -> Self {
        ValueTree::from(Tensor::scalar(v))
    }
}

/// An integer scalar leaf.
impl From<i64> for ValueTree {
    fn from(v: i64) -> Self {
        ValueTree::from(Tensor::scalar(v))
    }
}
