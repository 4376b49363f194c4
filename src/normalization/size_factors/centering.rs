//! Centering of size factors.
//!
//! Centering divides each set by its own mean so that normalized values stay on the
//! scale of the raw counts. When zeroes have to be preserved under a log transform
//! with a pseudo-count other than 1, the centered factors are further multiplied by
//! the pseudo-count ([`center_to`]).

use anyhow::anyhow;
use single_utilities::traits::FloatOps;

use crate::normalization::utils::{display, is_finite, mean};

/// Rescale `factors` so their mean is exactly one (up to rounding).
///
/// Fails on an empty slice and on a mean that is zero or not finite, before any
/// division happens.
pub fn center_size_factors<T>(factors: &[T]) -> anyhow::Result<Vec<T>>
where
    T: FloatOps,
{
    let Some(m) = mean(factors)? else {
        return Err(anyhow!("Cannot center an empty set of size factors"));
    };

    if m == T::zero() || !is_finite(m) {
        return Err(anyhow!(
            "Size factors have mean {}; centering requires a finite, non-zero mean",
            display(m)
        ));
    }

    Ok(factors.iter().map(|&f| f / m).collect())
}

/// Rescale `factors` so their mean equals `target`: center to unity, then scale.
pub fn center_to<T>(factors: &[T], target: T) -> anyhow::Result<Vec<T>>
where
    T: FloatOps,
{
    let centered = center_size_factors(factors)?;
    if target == T::one() {
        return Ok(centered);
    }
    Ok(centered.into_iter().map(|f| f * target).collect())
}
