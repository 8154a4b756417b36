use serde::{Deserialize, Serialize};

use crate::ml::forest::{ClassBalance, ForestConfig};

/// Random forest presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForestProfile {
    /// 300 trees, depth 12, split at 4 samples, balanced classes
    Reference,

    /// 200 trees, depth 10, split at 5 samples, balanced classes.
    /// Roughly a third cheaper to train on large state-wide batches.
    Fast,

    /// User-defined settings
    Custom,
}

impl ForestProfile {
    pub fn name(&self) -> &str {
        match self {
            Self::Reference => "reference",
            Self::Fast => "fast",
            Self::Custom => "custom",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Reference => "300 trees, max depth 12, min split 4, balanced class weights",
            Self::Fast => "200 trees, max depth 10, min split 5, balanced class weights",
            Self::Custom => "User-defined forest settings",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reference" => Some(Self::Reference),
            "fast" => Some(Self::Fast),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl ForestConfig {
    pub fn reference() -> Self {
        Self {
            profile: ForestProfile::Reference,
            n_trees: 300,
            max_depth: 12,
            min_samples_split: 4,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            class_balance: ClassBalance::Balanced,
            seed: 42,
        }
    }

    pub fn fast() -> Self {
        Self {
            profile: ForestProfile::Fast,
            n_trees: 200,
            max_depth: 10,
            min_samples_split: 5,
            ..Self::reference()
        }
    }

    /// Preset for a profile; `Custom` starts from the reference values
    pub fn for_profile(profile: ForestProfile) -> Self {
        match profile {
            ForestProfile::Reference => Self::reference(),
            ForestProfile::Fast => Self::fast(),
            ForestProfile::Custom => Self {
                profile: ForestProfile::Custom,
                ..Self::reference()
            },
        }
    }
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_configs() {
        let reference = ForestConfig::reference();
        assert_eq!(reference.profile, ForestProfile::Reference);
        assert_eq!(reference.n_trees, 300);
        assert_eq!(reference.max_depth, 12);
        assert_eq!(reference.min_samples_split, 4);
        assert_eq!(reference.class_balance, ClassBalance::Balanced);

        let fast = ForestConfig::fast();
        assert_eq!(fast.profile, ForestProfile::Fast);
        assert_eq!(fast.n_trees, 200);
        assert_eq!(fast.max_depth, 10);
        assert_eq!(fast.min_samples_split, 5);
        assert_eq!(fast.seed, reference.seed);
    }

    #[test]
    fn test_profile_metadata() {
        assert_eq!(ForestProfile::from_str(" Fast "), Some(ForestProfile::Fast));
        assert_eq!(ForestProfile::from_str("unknown"), None);
        assert_eq!(ForestProfile::Reference.name(), "reference");
        assert_eq!(
            ForestConfig::for_profile(ForestProfile::Custom).n_trees,
            ForestConfig::reference().n_trees
        );
    }
}
