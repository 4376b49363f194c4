//! The normalization kernel: division by size factors and the optional log transform.
//!
//! [`normalize_counts`] checks its inputs once and then picks one of two paths:
//!
//! - **Lazy** ([`lazy`]): the matrix is deferred and every feature shares one set. The
//!   output is an unevaluated composition over the input.
//! - **Eager** ([`eager`]): everything else. Rows are processed in parallel, each with
//!   the factor vector its feature set resolved to.

use std::fmt;

use anyhow::anyhow;
use single_utilities::traits::FloatOpsTS;

use crate::matrix::{ExpressionMatrix, MatrixData};
use crate::normalization::size_factors::ResolvedSizeFactors;
use crate::normalization::utils::{display, is_finite};

pub(crate) mod eager;
pub(crate) mod lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPath {
    Lazy,
    Eager,
}

impl fmt::Display for KernelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelPath::Lazy => write!(f, "lazy"),
            KernelPath::Eager => write!(f, "eager"),
        }
    }
}

/// Every factor of every set must be finite and strictly positive.
pub fn validate_size_factors<T>(resolved: &ResolvedSizeFactors<T>) -> anyhow::Result<()>
where
    T: FloatOpsTS,
{
    for set in resolved.sets() {
        if let Some((sample, &bad)) = set
            .factors
            .iter()
            .enumerate()
            .find(|&(_, &f)| !is_finite(f) || f <= T::zero())
        {
            return Err(anyhow!(
                "Size factors for the {} must be finite and positive, found {} for sample {}",
                set.id,
                display(bad),
                sample
            ));
        }
    }
    Ok(())
}

pub(crate) fn validate_offset<T>(offset: T) -> anyhow::Result<()>
where
    T: FloatOpsTS,
{
    if !is_finite(offset) || offset < T::zero() {
        return Err(anyhow!(
            "Pseudo-count offset must be finite and non-negative, got {}",
            display(offset)
        ));
    }
    Ok(())
}

pub fn select_path<T>(counts: &ExpressionMatrix<T>, resolved: &ResolvedSizeFactors<T>) -> KernelPath
where
    T: FloatOpsTS,
{
    if counts.is_lazy_capable() && resolved.single_set().is_some() {
        KernelPath::Lazy
    } else {
        KernelPath::Eager
    }
}

/// Normalize `counts` with the resolved size factors.
///
/// Each entry becomes `count / factor`, and `log2(count / factor + offset)` when
/// `return_log` is set. The result has the same shape and labels as `counts`.
pub fn normalize_counts<T>(
    counts: &ExpressionMatrix<T>,
    resolved: &ResolvedSizeFactors<T>,
    offset: T,
    return_log: bool,
) -> anyhow::Result<(ExpressionMatrix<T>, KernelPath)>
where
    T: FloatOpsTS,
{
    if resolved.dispatch().len() != counts.nrows() {
        return Err(anyhow!(
            "Dispatch table covers {} features, but the matrix has {} rows",
            resolved.dispatch().len(),
            counts.nrows()
        ));
    }
    if let Some(bad) = resolved.sets().iter().find(|s| s.factors.len() != counts.ncols()) {
        return Err(anyhow!(
            "Size factors for the {} have length {}, but the matrix has {} samples",
            bad.id,
            bad.factors.len(),
            counts.ncols()
        ));
    }
    validate_offset(offset)?;
    validate_size_factors(resolved)?;

    let path = select_path(counts, resolved);
    let data = match (path, counts.data(), resolved.single_set()) {
        (KernelPath::Lazy, MatrixData::Deferred(deferred), Some(set)) => {
            MatrixData::Deferred(lazy::normalize_deferred(deferred, &set.factors, offset, return_log)?)
        }
        (_, data, _) => {
            let sets: Vec<&[T]> = resolved.sets().iter().map(|s| s.factors.as_slice()).collect();
            eager::normalize_data(data, resolved.dispatch(), &sets, offset, return_log)?
        }
    };

    Ok((counts.relabel(data), path))
}
