//! Eager normalization: every entry is computed now, rows in parallel.
//!
//! Each row picks its factor vector through the dispatch table, so features from
//! different sets can be mixed freely. Output cells depend only on their own input
//! cell and their column's factor.

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use single_utilities::traits::{FloatOps, FloatOpsTS};

use crate::matrix::deferred::stack_row_blocks;
use crate::matrix::{DeferredMatrix, MatrixData};

/// `count / factor`, then `log2(. + offset)` when requested.
///
/// Assumes `count >= 0`, `factor > 0` and `offset > 0`, so the log argument is
/// positive. A zero offset yields `-inf` for zero counts.
#[inline]
pub(crate) fn scale_value<T>(count: T, factor: T, offset: T, return_log: bool) -> T
where
    T: FloatOps,
{
    let scaled = count / factor;
    if return_log {
        num_traits::Float::log2(scaled + offset)
    } else {
        scaled
    }
}

fn normalize_block<T>(
    counts: ArrayView2<T>,
    dispatch: &[usize],
    sets: &[&[T]],
    offset: T,
    return_log: bool,
    mut out: ArrayViewMut2<T>,
) where
    T: FloatOpsTS,
{
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(counts.axis_iter(Axis(0)).into_par_iter())
        .zip(dispatch.par_iter())
        .for_each(|((mut out_row, in_row), &slot)| {
            let factors = sets[slot];
            for ((value, &count), &factor) in out_row.iter_mut().zip(in_row.iter()).zip(factors) {
                *value = scale_value(count, factor, offset, return_log);
            }
        });
}

pub(crate) fn normalize_dense<T>(
    counts: &Array2<T>,
    dispatch: &[usize],
    sets: &[&[T]],
    offset: T,
    return_log: bool,
) -> Array2<T>
where
    T: FloatOpsTS,
{
    let mut out = Array2::zeros(counts.raw_dim());
    normalize_block(counts.view(), dispatch, sets, offset, return_log, out.view_mut());
    out
}

/// Sparse input stays sparse when zero maps to zero (no log, or an offset of one);
/// otherwise every implicit zero becomes `log2(offset)` and the result is dense.
pub(crate) fn normalize_sparse<T>(
    counts: &CsrMatrix<T>,
    dispatch: &[usize],
    sets: &[&[T]],
    offset: T,
    return_log: bool,
) -> anyhow::Result<MatrixData<T>>
where
    T: FloatOpsTS,
{
    if !return_log || offset == T::one() {
        let values: Vec<T> = (0..counts.nrows())
            .into_par_iter()
            .flat_map_iter(|i| {
                let row = counts.row(i);
                let factors = sets[dispatch[i]];
                row.col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(&j, &count)| scale_value(count, factors[j], offset, return_log))
                    .collect::<Vec<_>>()
            })
            .collect();

        let normalized = CsrMatrix::try_from_pattern_and_values(counts.pattern().clone(), values)
            .map_err(|e| anyhow!("Failed to assemble normalized sparse matrix: {:?}", e))?;
        return Ok(MatrixData::Sparse(normalized));
    }

    let baseline = num_traits::Float::log2(offset);
    let mut out = Array2::from_elem((counts.nrows(), counts.ncols()), baseline);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut out_row)| {
            let row = counts.row(i);
            let factors = sets[dispatch[i]];
            for (&j, &count) in row.col_indices().iter().zip(row.values()) {
                out_row[j] = scale_value(count, factors[j], offset, true);
            }
        });
    Ok(MatrixData::Dense(out))
}

/// Force a deferred matrix chunk by chunk through the eager kernel.
pub(crate) fn normalize_deferred_rows<T>(
    counts: &DeferredMatrix<T>,
    dispatch: &[usize],
    sets: &[&[T]],
    offset: T,
    return_log: bool,
) -> anyhow::Result<Array2<T>>
where
    T: FloatOpsTS,
{
    let blocks = counts
        .chunk_ranges()
        .into_par_iter()
        .map(|rows| {
            let raw = counts.realize_rows(rows.clone())?;
            let mut out = Array2::zeros(raw.raw_dim());
            normalize_block(raw.view(), &dispatch[rows], sets, offset, return_log, out.view_mut());
            Ok(out)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    stack_row_blocks(&blocks, counts.ncols())
}

pub(crate) fn normalize_data<T>(
    counts: &MatrixData<T>,
    dispatch: &[usize],
    sets: &[&[T]],
    offset: T,
    return_log: bool,
) -> anyhow::Result<MatrixData<T>>
where
    T: FloatOpsTS,
{
    match counts {
        MatrixData::Dense(m) => Ok(MatrixData::Dense(normalize_dense(m, dispatch, sets, offset, return_log))),
        MatrixData::Sparse(m) => normalize_sparse(m, dispatch, sets, offset, return_log),
        MatrixData::Deferred(m) => Ok(MatrixData::Dense(normalize_deferred_rows(
            m, dispatch, sets, offset, return_log,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;
    use ndarray::array;

    fn counts() -> Array2<f64> {
        array![[10.0, 20.0], [0.0, 5.0], [100.0, 50.0]]
    }

    #[test]
    fn divides_by_column_factor() {
        let a: &[f64] = &[1.0, 2.0];
        let out = normalize_dense(&counts(), &[0, 0, 0], &[a], 1.0, false);
        assert_eq!(out, array![[10.0, 10.0], [0.0, 2.5], [100.0, 25.0]]);
    }

    #[test]
    fn each_row_uses_its_own_set() {
        let a: &[f64] = &[1.0, 2.0];
        let b: &[f64] = &[1.0, 4.0];
        let out = normalize_dense(&counts(), &[0, 1, 0], &[a, b], 1.0, false);
        assert_abs_diff_eq!(out[[1, 1]], 1.25, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[2, 1]], 25.0, epsilon = 1e-12);
    }

    #[test]
    fn sparse_log_with_unit_offset_stays_sparse() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 3.0f64);
        coo.push(1, 1, 8.0);
        let csr = CsrMatrix::from(&coo);
        let a: &[f64] = &[1.0, 2.0];

        let out = normalize_sparse(&csr, &[0, 0], &[a], 1.0, true).unwrap();
        let MatrixData::Sparse(out) = out else {
            panic!("expected sparse output");
        };
        assert_eq!(out.nnz(), 2);
        assert_abs_diff_eq!(out.get_entry(0, 0).unwrap().into_value(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.get_entry(1, 1).unwrap().into_value(), 5.0f64.log2(), epsilon = 1e-12);
    }

    #[test]
    fn sparse_log_with_other_offset_densifies() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 6.0f64);
        let csr = CsrMatrix::from(&coo);
        let a: &[f64] = &[1.0, 2.0];

        let out = normalize_sparse(&csr, &[0, 0], &[a], 2.0, true).unwrap();
        let MatrixData::Dense(out) = out else {
            panic!("expected dense output");
        };
        assert_abs_diff_eq!(out[[0, 0]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn deferred_rows_match_dense() {
        let a: &[f64] = &[1.0, 2.0];
        let b: &[f64] = &[1.0, 4.0];
        let deferred = DeferredMatrix::from_source(counts()).with_chunk_size(2);
        let chunked = normalize_deferred_rows(&deferred, &[1, 0, 1], &[a, b], 0.5, true).unwrap();
        let dense = normalize_dense(&counts(), &[1, 0, 1], &[a, b], 0.5, true);
        for (x, y) in chunked.iter().zip(dense.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }
}
