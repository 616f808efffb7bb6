use crate::{check_len, KernelElem, Result};
use rayon::prelude::*;

/// Transposes a row-major `[rows, cols]` matrix into a row-major `[cols, rows]` one.
///
/// The output is filled row by row in parallel; each output row gathers one
/// input column.
pub fn cpu_transpose<T>(data: &[T], rows: usize, cols: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len("transpose input", data.len(), rows * cols)?;

    let mut out = vec![T::zero(); rows * cols];
    if rows == 0 || cols == 0 {
        return Ok(out);
    }

    out.par_chunks_mut(rows)
        .enumerate()
        .for_each(|(col, out_row)| {
            for (row, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[row * cols + col];
            }
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelError;

    #[test]
    fn test_transpose_rectangular() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let result = cpu_transpose(&data, 2, 3).unwrap();
        // 3x2:
        // [1, 4]
        // [2, 5]
        // [3, 6]
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_transpose_twice_is_identity() {
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let once = cpu_transpose(&data, 3, 4).unwrap();
        let twice = cpu_transpose(&once, 4, 3).unwrap();
        assert_eq!(twice, data);
    }

    #[test]
    fn test_transpose_empty() {
        let data: Vec<f32> = vec![];
        assert!(cpu_transpose(&data, 0, 5).unwrap().is_empty());
    }

    #[test]
    fn test_transpose_length_mismatch() {
        let data = vec![1.0f32; 5];
        let err = cpu_transpose(&data, 2, 3);
        assert!(matches!(err, Err(KernelError::LengthMismatch { .. })));
    }
}
