use std::fmt;

use anyhow::anyhow;

/// Identifier of a size-factor set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SizeFactorSetId {
    /// The set used for ordinary features.
    Primary,
    /// A named auxiliary set, e.g. spike-in transcripts.
    Control(String),
}

impl SizeFactorSetId {
    pub fn control(name: impl Into<String>) -> Self {
        SizeFactorSetId::Control(name.into())
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, SizeFactorSetId::Primary)
    }
}

impl fmt::Display for SizeFactorSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeFactorSetId::Primary => write!(f, "primary"),
            SizeFactorSetId::Control(name) => write!(f, "control set '{}'", name),
        }
    }
}

/// Assignment of every feature (row) to exactly one size-factor set.
///
/// Identifiers live in a small arena; each feature stores an index into it. The
/// primary identifier is always at position 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSetIndex {
    sets: Vec<SizeFactorSetId>,
    membership: Vec<usize>,
}

impl FeatureSetIndex {
    /// All features assigned to the primary set.
    pub fn primary_only(n_features: usize) -> Self {
        FeatureSetIndex {
            sets: vec![SizeFactorSetId::Primary],
            membership: vec![0; n_features],
        }
    }

    /// Move the given features into `set`. Later assignments override earlier ones.
    pub fn assign(&mut self, set: SizeFactorSetId, features: &[usize]) -> anyhow::Result<()> {
        let n_features = self.membership.len();
        if let Some(&bad) = features.iter().find(|&&f| f >= n_features) {
            return Err(anyhow!(
                "Feature index {} is out of bounds for {} features",
                bad,
                n_features
            ));
        }

        let slot = match self.sets.iter().position(|s| *s == set) {
            Some(slot) => slot,
            None => {
                self.sets.push(set);
                self.sets.len() - 1
            }
        };

        for &feature in features {
            self.membership[feature] = slot;
        }
        Ok(())
    }

    /// Builder form of [`assign`](Self::assign) for a named control set.
    pub fn with_control(mut self, name: impl Into<String>, features: &[usize]) -> anyhow::Result<Self> {
        self.assign(SizeFactorSetId::control(name), features)?;
        Ok(self)
    }

    pub fn n_features(&self) -> usize {
        self.membership.len()
    }

    /// Every identifier ever registered, including ones with no features left.
    pub fn sets(&self) -> &[SizeFactorSetId] {
        &self.sets
    }

    /// Arena position of each feature's set.
    pub fn membership(&self) -> &[usize] {
        &self.membership
    }

    pub fn set_of(&self, feature: usize) -> Option<&SizeFactorSetId> {
        self.membership.get(feature).map(|&slot| &self.sets[slot])
    }

    pub fn features_in(&self, set: &SizeFactorSetId) -> Vec<usize> {
        match self.sets.iter().position(|s| s == set) {
            Some(slot) => self
                .membership
                .iter()
                .enumerate()
                .filter_map(|(i, &m)| if m == slot { Some(i) } else { None })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Arena positions that have at least one feature, in arena order.
    pub fn used_sets(&self) -> Vec<usize> {
        let mut used = vec![false; self.sets.len()];
        for &slot in &self.membership {
            used[slot] = true;
        }
        used.iter()
            .enumerate()
            .filter_map(|(slot, &u)| if u { Some(slot) } else { None })
            .collect()
    }
}
