use anyhow::anyhow;
use single_utilities::traits::FloatOpsTS;

use crate::matrix::ExpressionMatrix;
use crate::normalization::utils::mean;

/// Estimates one size factor per sample from a count matrix.
///
/// Used when the experiment holds no primary size factors.
pub trait SizeFactorEstimator<T>: Send + Sync {
    fn estimate(&self, counts: &ExpressionMatrix<T>) -> anyhow::Result<Vec<T>>;
}

/// Library size factors: per-sample totals divided by their mean.
///
/// The estimate is centered by construction. Samples with no counts get a factor of
/// zero, which the kernel later rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibrarySizeFactors;

impl<T> SizeFactorEstimator<T> for LibrarySizeFactors
where
    T: FloatOpsTS,
{
    fn estimate(&self, counts: &ExpressionMatrix<T>) -> anyhow::Result<Vec<T>> {
        let library_sizes = counts.col_sums()?;
        let Some(m) = mean(&library_sizes)? else {
            return Ok(Vec::new());
        };

        if m <= T::zero() {
            return Err(anyhow!(
                "All {} samples have zero total counts; library size factors are undefined",
                library_sizes.len()
            ));
        }

        Ok(library_sizes.into_iter().map(|l| l / m).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn factors_are_proportional_to_library_size() {
        let counts = ExpressionMatrix::dense(array![[10.0f64, 20.0, 30.0], [0.0, 20.0, 30.0]]);
        let factors = LibrarySizeFactors.estimate(&counts).unwrap();

        // Library sizes 10, 40, 60 with mean 110/3.
        assert_abs_diff_eq!(factors[0], 30.0 / 110.0, epsilon = 1e-12);
        assert_abs_diff_eq!(factors[1], 120.0 / 110.0, epsilon = 1e-12);
        assert_abs_diff_eq!(factors.iter().sum::<f64>() / 3.0, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_samples_give_zero_factor() {
        let counts = ExpressionMatrix::dense(array![[0.0f64, 4.0], [0.0, 6.0]]);
        let factors = LibrarySizeFactors.estimate(&counts).unwrap();
        assert_eq!(factors[0], 0.0);
        assert_abs_diff_eq!(factors[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn all_zero_matrix_is_an_error() {
        let counts = ExpressionMatrix::dense(Array2::<f64>::zeros((2, 3)));
        assert!(LibrarySizeFactors.estimate(&counts).is_err());
    }
}
