//! Lazy normalization for deferred matrices sharing a single size-factor set.
//!
//! The result is the input's deferred composition extended by "divide columns", then
//! optionally "add offset" and "log2". No entry is computed here; whoever forces the
//! result pays for it, and may do so in chunks.

use single_utilities::traits::FloatOpsTS;

use crate::matrix::DeferredMatrix;

pub(crate) fn normalize_deferred<T>(
    counts: &DeferredMatrix<T>,
    factors: &[T],
    offset: T,
    return_log: bool,
) -> anyhow::Result<DeferredMatrix<T>>
where
    T: FloatOpsTS,
{
    let scaled = counts.divide_columns(factors)?;
    if return_log {
        Ok(scaled.add_scalar(offset).log2())
    } else {
        Ok(scaled)
    }
}
