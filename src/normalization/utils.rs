use anyhow::anyhow;
use single_utilities::traits::FloatOps;

/// Convert an `f64` into the working float type, failing instead of panicking.
pub(crate) fn cast<T>(value: f64) -> anyhow::Result<T>
where
    T: FloatOps,
{
    T::from(value).ok_or_else(|| anyhow!("Value {} cannot be represented in the working float type", value))
}

/// Arithmetic mean of a slice; `None` for an empty slice.
pub(crate) fn mean<T>(values: &[T]) -> anyhow::Result<Option<T>>
where
    T: FloatOps,
{
    if values.is_empty() {
        return Ok(None);
    }

    let mut sum = T::zero();
    for &v in values {
        sum += v;
    }
    let n: T = cast(values.len() as f64)?;
    Ok(Some(sum / n))
}

#[inline]
pub(crate) fn is_finite<T>(value: T) -> bool
where
    T: FloatOps,
{
    num_traits::Float::is_finite(value)
}

/// Lossy conversion used for error messages only.
#[inline]
pub(crate) fn display<T>(value: T) -> f64
where
    T: FloatOps,
{
    value.to_f64().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mean_of_empty_slice_is_none() {
        let empty: [f64; 0] = [];
        assert!(mean(&empty).unwrap().is_none());
    }

    #[test]
    fn mean_of_values() {
        let m = mean(&[1.0f64, 2.0, 6.0]).unwrap().unwrap();
        assert_abs_diff_eq!(m, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_detection() {
        assert!(is_finite(1.5f32));
        assert!(!is_finite(f64::NAN));
        assert!(!is_finite(f64::INFINITY));
    }
}
