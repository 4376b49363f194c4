//! Size-factor normalization of count matrices.
//!
//! This module provides the normalization engine used to remove sample-specific
//! technical bias (e.g. sequencing depth) from count data before downstream
//! comparisons. Features can belong to different size-factor sets, such as
//! endogenous genes versus spike-in transcripts, each normalized by its own factors.
//!
//! ## Workflow
//!
//! [`normalize`] runs the whole pipeline against an [`Experiment`]:
//!
//! 1. Resolve the size factors of every feature set ([`size_factors`]).
//! 2. Optionally center each set to mean one.
//! 3. When zeroes must survive a log transform with a pseudo-count other than one,
//!    fold the pseudo-count into the factors and use an offset of one.
//! 4. Run the [`kernel`], lazily for deferred single-set input, eagerly otherwise.
//! 5. Store the result as `"logcounts"` or `"normcounts"` and remember the offset.
//!
//! Nothing is written to the experiment unless every step succeeds.

use std::fmt;

use anyhow::anyhow;
use single_utilities::traits::FloatOpsTS;

use crate::experiment::{Experiment, SizeFactorSetId};

pub mod kernel;
pub mod size_factors;

pub(crate) mod utils;

pub use kernel::{KernelPath, normalize_counts, validate_size_factors};
pub use size_factors::{
    FactorOrigin, LibrarySizeFactors, ResolvedSet, ResolvedSizeFactors, SizeFactorEstimator,
    center_size_factors, center_to, resolve_size_factors,
};

/// Advisory conditions that do not stop normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationWarning {
    /// A control set has no size factors; the primary factors were used instead.
    MissingControlSizeFactors { set: String },
    /// No primary size factors were stored; library size factors were estimated.
    LibrarySizeFallback,
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationWarning::MissingControlSizeFactors { set } => write!(
                f,
                "no size factors for feature subset '{}', using primary size factors",
                set
            ),
            NormalizationWarning::LibrarySizeFallback => write!(
                f,
                "no primary size factors available, using library size factors"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions<T> {
    /// Assay holding the raw counts.
    pub assay_name: String,
    /// Log2-transform the normalized values after adding the pseudo-count.
    pub return_log: bool,
    /// Pseudo-count; falls back to the experiment's stored value, then to one.
    pub pseudo_count_offset: Option<T>,
    /// Center every size-factor set to mean one and store the centered factors.
    pub center_size_factors: bool,
    /// Keep zero counts at exactly zero after the log transform.
    pub preserve_zeroes: bool,
    /// Name of the output assay; defaults to `"logcounts"` or `"normcounts"`.
    pub output_name: Option<String>,
}

impl<T> Default for NormalizeOptions<T> {
    fn default() -> Self {
        NormalizeOptions {
            assay_name: "counts".to_string(),
            return_log: true,
            pseudo_count_offset: None,
            center_size_factors: true,
            preserve_zeroes: false,
            output_name: None,
        }
    }
}

impl<T> NormalizeOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assay_name(mut self, name: impl Into<String>) -> Self {
        self.assay_name = name.into();
        self
    }

    pub fn with_log(mut self, return_log: bool) -> Self {
        self.return_log = return_log;
        self
    }

    pub fn with_pseudo_count(mut self, offset: T) -> Self {
        self.pseudo_count_offset = Some(offset);
        self
    }

    pub fn with_centering(mut self, center: bool) -> Self {
        self.center_size_factors = center;
        self
    }

    pub fn with_preserve_zeroes(mut self, preserve: bool) -> Self {
        self.preserve_zeroes = preserve;
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn output_assay(&self) -> &str {
        match &self.output_name {
            Some(name) => name,
            None if self.return_log => "logcounts",
            None => "normcounts",
        }
    }
}

/// What a [`normalize`] call did.
#[derive(Debug, Clone)]
pub struct NormalizationReport<T> {
    /// Assay the result was stored under.
    pub output_name: String,
    pub path: KernelPath,
    /// Offset added before the log transform (one after zero-preserving folding).
    pub offset: T,
    /// Offset written to the experiment, if the output was log-transformed.
    pub persisted_offset: Option<T>,
    pub warnings: Vec<NormalizationWarning>,
}

/// Explicit argument, then the stored value, then one.
fn resolve_offset<T>(explicit: Option<T>, stored: Option<T>) -> T
where
    T: FloatOpsTS,
{
    explicit.or(stored).unwrap_or_else(T::one)
}

/// Normalize an experiment's counts, estimating missing primary size factors from
/// library sizes.
pub fn normalize<T, X>(experiment: &mut X, options: &NormalizeOptions<T>) -> anyhow::Result<NormalizationReport<T>>
where
    T: FloatOpsTS,
    X: Experiment<T> + ?Sized,
{
    normalize_with(experiment, options, &LibrarySizeFactors)
}

/// [`normalize`] with a custom estimator for missing primary size factors.
pub fn normalize_with<T, X, E>(
    experiment: &mut X,
    options: &NormalizeOptions<T>,
    estimator: &E,
) -> anyhow::Result<NormalizationReport<T>>
where
    T: FloatOpsTS,
    X: Experiment<T> + ?Sized,
    E: SizeFactorEstimator<T> + ?Sized,
{
    let counts = experiment
        .assay(&options.assay_name)
        .ok_or_else(|| anyhow!("Assay '{}' not found", options.assay_name))?;

    let mut offset = resolve_offset(options.pseudo_count_offset, experiment.pseudo_count());
    kernel::validate_offset(offset)?;

    let (resolved, warnings) = resolve_size_factors(&*experiment, counts, estimator)?;

    let (mut working, to_persist) = if options.center_size_factors {
        let centered = resolved.centered()?;
        let persist: Vec<(SizeFactorSetId, Vec<T>)> = centered
            .sets()
            .iter()
            .map(|set| (set.id.clone(), set.factors.clone()))
            .collect();
        (centered, persist)
    } else {
        (resolved, Vec::new())
    };

    if options.preserve_zeroes && offset != T::one() {
        working = working.scaled(offset)?;
        offset = T::one();
    }

    let (normalized, path) = normalize_counts(counts, &working, offset, options.return_log)?;
    log::debug!(
        "Normalized assay '{}' via the {} path using {} size factor set(s)",
        options.assay_name,
        path,
        working.sets().len()
    );

    for (id, factors) in to_persist {
        experiment.set_size_factors(&id, factors);
    }

    let output_name = options.output_assay().to_string();
    experiment.set_assay(&output_name, normalized);

    let persisted_offset = if options.return_log {
        experiment.set_pseudo_count(offset);
        Some(offset)
    } else {
        None
    };

    Ok(NormalizationReport {
        output_name,
        path,
        offset,
        persisted_offset,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{FeatureSetIndex, SingleCellExperiment};
    use crate::matrix::ExpressionMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sce() -> SingleCellExperiment<f64> {
        SingleCellExperiment::new(ExpressionMatrix::dense(array![[10.0, 20.0], [0.0, 5.0], [100.0, 50.0]]))
    }

    #[test]
    fn default_output_names() {
        let log: NormalizeOptions<f64> = NormalizeOptions::new();
        assert_eq!(log.output_assay(), "logcounts");
        assert_eq!(log.clone().with_log(false).output_assay(), "normcounts");
        assert_eq!(log.with_output_name("custom").output_assay(), "custom");
    }

    #[test]
    fn offset_resolution_order() {
        assert_eq!(resolve_offset(Some(3.0), Some(2.0)), 3.0);
        assert_eq!(resolve_offset(None, Some(2.0)), 2.0);
        assert_eq!(resolve_offset::<f64>(None, None), 1.0);
    }

    #[test]
    fn stored_offset_is_reused() {
        let mut sce = sce()
            .with_size_factors(SizeFactorSetId::Primary, vec![1.0, 1.0])
            .unwrap()
            .with_pseudo_count(4.0);
        let report = normalize(&mut sce, &NormalizeOptions::new()).unwrap();

        assert_eq!(report.offset, 4.0);
        let out = sce.assay("logcounts").unwrap().to_dense().unwrap();
        assert_abs_diff_eq!(out[[1, 0]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn centered_factors_are_persisted() {
        let mut sce = sce()
            .with_size_factors(SizeFactorSetId::Primary, vec![2.0, 4.0])
            .unwrap();
        normalize(&mut sce, &NormalizeOptions::new()).unwrap();

        let stored = sce.size_factors(&SizeFactorSetId::Primary).unwrap();
        assert_abs_diff_eq!(stored[0], 2.0 / 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(stored[1], 4.0 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn uncentered_run_leaves_factors_alone() {
        let mut sce = sce()
            .with_size_factors(SizeFactorSetId::Primary, vec![2.0, 4.0])
            .unwrap();
        let report = normalize(&mut sce, &NormalizeOptions::new().with_centering(false).with_log(false)).unwrap();

        assert_eq!(sce.size_factors(&SizeFactorSetId::Primary).unwrap(), &[2.0, 4.0]);
        assert!(report.persisted_offset.is_none());
        assert!(sce.pseudo_count().is_none());
        assert!(sce.assay("normcounts").is_some());
    }

    #[test]
    fn zero_preservation_folds_offset_into_factors() {
        let mut sce = sce()
            .with_size_factors(SizeFactorSetId::Primary, vec![1.0, 2.0])
            .unwrap();
        let options = NormalizeOptions::new()
            .with_centering(false)
            .with_pseudo_count(3.0)
            .with_preserve_zeroes(true);
        let report = normalize(&mut sce, &options).unwrap();

        assert_eq!(report.offset, 1.0);
        assert_eq!(report.persisted_offset, Some(1.0));
        // Working factors are scaled, stored ones are not.
        assert_eq!(sce.size_factors(&SizeFactorSetId::Primary).unwrap(), &[1.0, 2.0]);

        let out = sce.assay("logcounts").unwrap().to_dense().unwrap();
        assert_eq!(out[[1, 0]], 0.0);
        assert_abs_diff_eq!(out[[0, 0]], (10.0f64 / 3.0 + 1.0).log2(), epsilon = 1e-12);
    }

    #[test]
    fn failed_run_leaves_experiment_untouched() {
        let mut sce = sce()
            .with_feature_sets(FeatureSetIndex::primary_only(3).with_control("ERCC", &[1]).unwrap())
            .unwrap()
            .with_size_factors(SizeFactorSetId::Primary, vec![1.0, 2.0])
            .unwrap()
            .with_size_factors(SizeFactorSetId::control("ERCC"), vec![1.0, -1.0])
            .unwrap();

        let err = normalize(&mut sce, &NormalizeOptions::new().with_centering(false)).err().unwrap();
        assert!(err.to_string().contains("ERCC"));
        assert_eq!(sce.assay_names(), vec!["counts"]);
        assert!(sce.pseudo_count().is_none());
    }

    #[test]
    fn zero_mean_set_fails_during_centering() {
        let mut sce = sce()
            .with_size_factors(SizeFactorSetId::Primary, vec![1.0, -1.0])
            .unwrap();
        let err = normalize(&mut sce, &NormalizeOptions::new()).err().unwrap();

        assert!(format!("{:#}", err).contains("mean 0"));
        assert_eq!(sce.size_factors(&SizeFactorSetId::Primary).unwrap(), &[1.0, -1.0]);
    }

    #[test]
    fn missing_assay_is_an_error() {
        let mut sce = sce();
        let options = NormalizeOptions::new().with_assay_name("raw");
        assert!(normalize(&mut sce, &options).is_err());
    }
}
