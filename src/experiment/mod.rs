//! Container abstraction the normalization engine reads from and writes back to.
//!
//! The engine only needs a handful of accessors, captured by the [`Experiment`] trait:
//! named assays, size factors per set, the feature-to-set assignment and a stored
//! pseudo-count. [`SingleCellExperiment`] is a plain in-memory implementation.

use std::collections::HashMap;

use anyhow::anyhow;
use single_utilities::traits::FloatOpsTS;

use crate::matrix::ExpressionMatrix;

mod feature_sets;

pub use feature_sets::{FeatureSetIndex, SizeFactorSetId};

pub trait Experiment<T> {
    fn assay(&self, name: &str) -> Option<&ExpressionMatrix<T>>;

    fn set_assay(&mut self, name: &str, matrix: ExpressionMatrix<T>);

    fn size_factors(&self, set: &SizeFactorSetId) -> Option<&[T]>;

    fn set_size_factors(&mut self, set: &SizeFactorSetId, factors: Vec<T>);

    fn feature_sets(&self) -> &FeatureSetIndex;

    /// Pseudo-count persisted by a previous log-transform run.
    fn pseudo_count(&self) -> Option<T>;

    fn set_pseudo_count(&mut self, offset: T);
}

pub struct SingleCellExperiment<T> {
    n_features: usize,
    n_samples: usize,
    assays: HashMap<String, ExpressionMatrix<T>>,
    size_factors: HashMap<SizeFactorSetId, Vec<T>>,
    feature_sets: FeatureSetIndex,
    pseudo_count: Option<T>,
}

impl<T> SingleCellExperiment<T>
where
    T: FloatOpsTS,
{
    /// Create an experiment whose raw counts are stored under `"counts"`.
    pub fn new(counts: ExpressionMatrix<T>) -> Self {
        let (n_features, n_samples) = counts.shape();
        let mut assays = HashMap::new();
        assays.insert("counts".to_string(), counts);
        SingleCellExperiment {
            n_features,
            n_samples,
            assays,
            size_factors: HashMap::new(),
            feature_sets: FeatureSetIndex::primary_only(n_features),
            pseudo_count: None,
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn with_feature_sets(mut self, feature_sets: FeatureSetIndex) -> anyhow::Result<Self> {
        if feature_sets.n_features() != self.n_features {
            return Err(anyhow!(
                "Feature set index covers {} features, experiment has {}",
                feature_sets.n_features(),
                self.n_features
            ));
        }
        self.feature_sets = feature_sets;
        Ok(self)
    }

    pub fn with_size_factors(mut self, set: SizeFactorSetId, factors: Vec<T>) -> anyhow::Result<Self> {
        if factors.len() != self.n_samples {
            return Err(anyhow!(
                "Size factors for the {} have length {}, expected {}",
                set,
                factors.len(),
                self.n_samples
            ));
        }
        self.size_factors.insert(set, factors);
        Ok(self)
    }

    pub fn with_pseudo_count(mut self, offset: T) -> Self {
        self.pseudo_count = Some(offset);
        self
    }

    pub fn remove_size_factors(&mut self, set: &SizeFactorSetId) -> Option<Vec<T>> {
        self.size_factors.remove(set)
    }

    pub fn assay_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.assays.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl<T> Experiment<T> for SingleCellExperiment<T>
where
    T: FloatOpsTS,
{
    fn assay(&self, name: &str) -> Option<&ExpressionMatrix<T>> {
        self.assays.get(name)
    }

    fn set_assay(&mut self, name: &str, matrix: ExpressionMatrix<T>) {
        self.assays.insert(name.to_string(), matrix);
    }

    fn size_factors(&self, set: &SizeFactorSetId) -> Option<&[T]> {
        self.size_factors.get(set).map(|f| f.as_slice())
    }

    fn set_size_factors(&mut self, set: &SizeFactorSetId, factors: Vec<T>) {
        self.size_factors.insert(set.clone(), factors);
    }

    fn feature_sets(&self) -> &FeatureSetIndex {
        &self.feature_sets
    }

    fn pseudo_count(&self) -> Option<T> {
        self.pseudo_count
    }

    fn set_pseudo_count(&mut self, offset: T) {
        self.pseudo_count = Some(offset);
    }
}
