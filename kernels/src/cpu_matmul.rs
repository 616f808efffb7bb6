use crate::{check_len, KernelElem, Result};
use rayon::prelude::*;

/// Dimensions of a single `[m, k] x [k, n]` product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

/// Row-major matrix multiplication `[m, k] x [k, n] -> [m, n]`.
///
/// The right-hand side is transposed once up front so the inner dot product
/// walks both operands sequentially. Callers that already hold `rhs` as
/// `[n, k]` should use [`cpu_matmul_transposed`] and skip the copy.
pub fn cpu_matmul<T>(lhs: &[T], rhs: &[T], dims: MatmulDims) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let MatmulDims { k, n, .. } = dims;
    check_len("matmul rhs", rhs.len(), k * n)?;
    let rhs_t = super::cpu_transpose::cpu_transpose(rhs, k, n)?;
    cpu_matmul_transposed(lhs, &rhs_t, dims)
}

/// `[m, k] x [n, k]^T -> [m, n]`, with `rhs_t` stored row-major as `[n, k]`.
///
/// Output rows are computed in parallel; every output element is one
/// contiguous dot product.
pub fn cpu_matmul_transposed<T>(lhs: &[T], rhs_t: &[T], dims: MatmulDims) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let MatmulDims { m, k, n } = dims;
    check_len("matmul lhs", lhs.len(), m * k)?;
    check_len("matmul rhs", rhs_t.len(), k * n)?;

    let mut out = vec![T::zero(); m * n];
    if m == 0 || n == 0 {
        return Ok(out);
    }

    out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
        let a = &lhs[row * k..(row + 1) * k];
        for (col, out_elem) in out_row.iter_mut().enumerate() {
            let b = &rhs_t[col * k..(col + 1) * k];
            let mut sum = T::zero();
            for (&x, &y) in a.iter().zip(b.iter()) {
                sum += x * y;
            }
            *out_elem = sum;
        }
    });

    Ok(out)
}
