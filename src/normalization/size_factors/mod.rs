//! Resolution of size-factor sets to features.
//!
//! [`resolve_size_factors`] turns the experiment's stored factors and its
//! [`FeatureSetIndex`](crate::experiment::FeatureSetIndex) into a
//! [`ResolvedSizeFactors`]: a short list of distinct factor vectors plus one index per
//! feature into that list. The kernel only ever consults this dispatch table.

use anyhow::{Context, anyhow};
use single_utilities::traits::FloatOpsTS;

use crate::experiment::{Experiment, SizeFactorSetId};
use crate::matrix::ExpressionMatrix;
use crate::normalization::NormalizationWarning;

pub mod centering;
pub mod library_size;

pub use centering::{center_size_factors, center_to};
pub use library_size::{LibrarySizeFactors, SizeFactorEstimator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorOrigin {
    /// Read from the experiment.
    Stored,
    /// Computed by the fallback estimator because the primary set had none.
    Estimated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSet<T> {
    pub id: SizeFactorSetId,
    pub factors: Vec<T>,
    pub origin: FactorOrigin,
}

/// Distinct factor sets plus the per-feature dispatch table into them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSizeFactors<T> {
    sets: Vec<ResolvedSet<T>>,
    dispatch: Vec<usize>,
}

impl<T> ResolvedSizeFactors<T>
where
    T: FloatOpsTS,
{
    pub fn from_parts(sets: Vec<ResolvedSet<T>>, dispatch: Vec<usize>) -> anyhow::Result<Self> {
        if let Some(first) = sets.first() {
            let n_samples = first.factors.len();
            if let Some(bad) = sets.iter().find(|s| s.factors.len() != n_samples) {
                return Err(anyhow!(
                    "Size factors for the {} have length {}, expected {}",
                    bad.id,
                    bad.factors.len(),
                    n_samples
                ));
            }
        }
        if let Some(&bad) = dispatch.iter().find(|&&slot| slot >= sets.len()) {
            return Err(anyhow!(
                "Dispatch entry {} refers to a missing size factor set ({} available)",
                bad,
                sets.len()
            ));
        }
        Ok(ResolvedSizeFactors { sets, dispatch })
    }

    /// The same factors for all `n_features` features.
    pub fn uniform(factors: Vec<T>, n_features: usize) -> Self {
        ResolvedSizeFactors {
            sets: vec![ResolvedSet {
                id: SizeFactorSetId::Primary,
                factors,
                origin: FactorOrigin::Stored,
            }],
            dispatch: vec![0; n_features],
        }
    }

    pub fn sets(&self) -> &[ResolvedSet<T>] {
        &self.sets
    }

    pub fn dispatch(&self) -> &[usize] {
        &self.dispatch
    }

    /// Factors applied to `feature`.
    pub fn factors_for(&self, feature: usize) -> Option<&[T]> {
        self.dispatch
            .get(feature)
            .map(|&slot| self.sets[slot].factors.as_slice())
    }

    /// The only set in use, if every feature shares one.
    pub fn single_set(&self) -> Option<&ResolvedSet<T>> {
        match self.sets.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Apply `f` to every factor vector, keeping the dispatch table.
    pub fn map_factors<F>(&self, mut f: F) -> anyhow::Result<Self>
    where
        F: FnMut(&ResolvedSet<T>) -> anyhow::Result<Vec<T>>,
    {
        let mut sets = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            let factors = f(set)?;
            sets.push(ResolvedSet {
                id: set.id.clone(),
                factors,
                origin: set.origin,
            });
        }
        Self::from_parts(sets, self.dispatch.clone())
    }

    /// Every set divided by its own mean.
    pub fn centered(&self) -> anyhow::Result<Self> {
        self.map_factors(|set| {
            center_size_factors(&set.factors)
                .with_context(|| format!("Cannot center size factors of the {}", set.id))
        })
    }

    /// Every set multiplied by `scale`.
    pub fn scaled(&self, scale: T) -> anyhow::Result<Self> {
        self.map_factors(|set| Ok(set.factors.iter().map(|&f| f * scale).collect()))
    }
}

fn check_length<T>(id: &SizeFactorSetId, factors: &[T], n_samples: usize) -> anyhow::Result<()> {
    if factors.len() != n_samples {
        return Err(anyhow!(
            "Size factors for the {} have length {}, but the matrix has {} samples",
            id,
            factors.len(),
            n_samples
        ));
    }
    Ok(())
}

fn raise(warnings: &mut Vec<NormalizationWarning>, warning: NormalizationWarning) {
    log::warn!("{}", warning);
    warnings.push(warning);
}

/// Slot of the primary set, reading or estimating it on first use.
fn primary_slot<T, X, E>(
    experiment: &X,
    counts: &ExpressionMatrix<T>,
    estimator: &E,
    sets: &mut Vec<ResolvedSet<T>>,
    slot: &mut Option<usize>,
    warnings: &mut Vec<NormalizationWarning>,
) -> anyhow::Result<usize>
where
    T: FloatOpsTS,
    X: Experiment<T> + ?Sized,
    E: SizeFactorEstimator<T> + ?Sized,
{
    if let Some(existing) = *slot {
        return Ok(existing);
    }

    let id = SizeFactorSetId::Primary;
    let resolved = match experiment.size_factors(&id) {
        Some(factors) => {
            check_length(&id, factors, counts.ncols())?;
            ResolvedSet {
                id,
                factors: factors.to_vec(),
                origin: FactorOrigin::Stored,
            }
        }
        None => {
            raise(warnings, NormalizationWarning::LibrarySizeFallback);
            let factors = estimator
                .estimate(counts)
                .context("Fallback size factor estimation failed")?;
            check_length(&id, &factors, counts.ncols())?;
            ResolvedSet {
                id,
                factors,
                origin: FactorOrigin::Estimated,
            }
        }
    };

    sets.push(resolved);
    let new_slot = sets.len() - 1;
    *slot = Some(new_slot);
    Ok(new_slot)
}

/// Resolve the size factors for every feature set that has at least one feature.
///
/// Control sets without stored factors fall back to the primary factors; a primary
/// set without stored factors is estimated from `counts` by `estimator`. Both raise a
/// [`NormalizationWarning`], returned alongside the resolution and also logged.
pub fn resolve_size_factors<T, X, E>(
    experiment: &X,
    counts: &ExpressionMatrix<T>,
    estimator: &E,
) -> anyhow::Result<(ResolvedSizeFactors<T>, Vec<NormalizationWarning>)>
where
    T: FloatOpsTS,
    X: Experiment<T> + ?Sized,
    E: SizeFactorEstimator<T> + ?Sized,
{
    let index = experiment.feature_sets();
    if index.n_features() != counts.nrows() {
        return Err(anyhow!(
            "Feature set index covers {} features, but the matrix has {} rows",
            index.n_features(),
            counts.nrows()
        ));
    }

    let n_samples = counts.ncols();
    let mut sets: Vec<ResolvedSet<T>> = Vec::new();
    let mut warnings = Vec::new();
    let mut primary: Option<usize> = None;
    let mut arena_to_slot: Vec<Option<usize>> = vec![None; index.sets().len()];

    for arena_idx in index.used_sets() {
        let id = &index.sets()[arena_idx];
        let slot = if id.is_primary() {
            primary_slot(experiment, counts, estimator, &mut sets, &mut primary, &mut warnings)?
        } else {
            match experiment.size_factors(id) {
                Some(factors) => {
                    check_length(id, factors, n_samples)?;
                    sets.push(ResolvedSet {
                        id: id.clone(),
                        factors: factors.to_vec(),
                        origin: FactorOrigin::Stored,
                    });
                    sets.len() - 1
                }
                None => {
                    let name = match id {
                        SizeFactorSetId::Control(name) => name.clone(),
                        SizeFactorSetId::Primary => id.to_string(),
                    };
                    raise(&mut warnings, NormalizationWarning::MissingControlSizeFactors { set: name });
                    primary_slot(experiment, counts, estimator, &mut sets, &mut primary, &mut warnings)?
                }
            }
        };
        arena_to_slot[arena_idx] = Some(slot);
    }

    let dispatch = index
        .membership()
        .iter()
        .map(|&arena_idx| {
            arena_to_slot[arena_idx]
                .ok_or_else(|| anyhow!("Feature set {} was not resolved", index.sets()[arena_idx]))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let resolved = ResolvedSizeFactors::from_parts(sets, dispatch)?;
    Ok((resolved, warnings))
}
