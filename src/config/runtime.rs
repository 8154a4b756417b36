use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::ForestProfile;
use crate::error::{Result, ScoringError};
use crate::ml::forest::ForestConfig;

/// Environment prefix for overrides, e.g. `RANKER__LABELER__GROWTH_WEIGHT=0.5`
pub const ENV_PREFIX: &str = "RANKER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnMapping,
    pub features: FeatureSettings,
    pub labeler: LabelerConfig,
    pub split: SplitSettings,
    pub forest: ForestConfig,
}

impl PipelineConfig {
    /// Load from an optional TOML file, then apply `RANKER__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when set
    fn load_with_env(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );
        let sources = builder.build()?;

        // Forest keys left unset fall back to the selected profile's preset
        let profile = match sources.get_string("forest.profile") {
            Ok(name) => ForestProfile::from_str(&name).ok_or_else(|| {
                ScoringError::InvalidConfig(vec![format!(
                    "forest.profile must be reference, fast or custom (got '{}')",
                    name
                )])
            })?,
            Err(config::ConfigError::NotFound(_)) => ForestProfile::Reference,
            Err(e) => return Err(e.into()),
        };
        let preset = ForestConfig::for_profile(profile);

        let loaded: PipelineConfig = config::Config::builder()
            .set_default("forest.n_trees", preset.n_trees as i64)?
            .set_default("forest.max_depth", preset.max_depth as i64)?
            .set_default("forest.min_samples_split", preset.min_samples_split as i64)?
            .set_default("forest.min_samples_leaf", preset.min_samples_leaf as i64)?
            .set_default("forest.bootstrap", preset.bootstrap)?
            .set_default("forest.seed", preset.seed as i64)?
            .add_source(sources)
            .build()?
            .try_deserialize()?;
        loaded.validate().map_err(ScoringError::InvalidConfig)?;

        info!(
            "Configuration loaded: profile={} ({}), weights={:.2}/{:.2}/{:.2}/{:.2}",
            loaded.forest.profile.name(),
            loaded.forest.profile.description(),
            loaded.labeler.growth_weight,
            loaded.labeler.momentum_weight,
            loaded.labeler.affordability_weight,
            loaded.labeler.vacancy_weight,
        );
        debug!(
            "Forest: {} trees, max depth {}, min split {}, min leaf {}",
            loaded.forest.n_trees,
            loaded.forest.max_depth,
            loaded.forest.min_samples_split,
            loaded.forest.min_samples_leaf
        );
        Ok(loaded)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Columns
        if self.columns.region_column.trim().is_empty() {
            errors.push("columns.region_column must not be empty".to_string());
        }
        if self.columns.growth_prefix.is_empty() {
            errors.push("columns.growth_prefix must not be empty".to_string());
        }

        // Features
        let eps = self.features.volatility_epsilon;
        if !(eps.is_finite() && eps > 0.0) {
            errors.push("features.volatility_epsilon must be a positive finite number".to_string());
        }

        // Labeler
        errors.extend(self.labeler.validate());

        // Split
        if self.split.test_ratio <= 0.0 || self.split.test_ratio >= 1.0 {
            errors.push("split.test_ratio must be between 0 and 1".to_string());
        }

        // Forest
        if self.forest.n_trees == 0 {
            errors.push("forest.n_trees must be > 0".to_string());
        }
        if self.forest.max_depth == 0 {
            errors.push("forest.max_depth must be > 0".to_string());
        }
        if self.forest.min_samples_split < 2 {
            errors.push("forest.min_samples_split must be >= 2".to_string());
        }
        if self.forest.min_samples_leaf == 0 {
            errors.push("forest.min_samples_leaf must be > 0".to_string());
        }
        if self.forest.max_features == Some(0) {
            errors.push("forest.max_features must be > 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Names of the raw input columns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub region_column: String,
    pub city_column: String,
    pub state_column: String,
    /// Every `<prefix><YYYY>` header is a growth-rate column for that year
    pub growth_prefix: String,
    pub vacancy_column: String,
    pub affordability_column: String,
    /// Explicit price column; when unset the most recent `YYYY-MM-DD` header is used
    pub price_column: Option<String>,
    /// Tried in order when the primary price column is absent
    pub price_fallback_columns: Vec<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            region_column: "RegionName".to_string(),
            city_column: "City".to_string(),
            state_column: "State".to_string(),
            growth_prefix: "Growth_".to_string(),
            vacancy_column: "Vacancy_Rate_2023".to_string(),
            affordability_column: "Affordability_Ratio_2023".to_string(),
            price_column: None,
            price_fallback_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Latest growth year used for momentum/trend; defaults to the newest growth column
    pub reference_year: Option<i32>,
    /// Added to volatility before taking its reciprocal
    pub volatility_epsilon: f64,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            reference_year: None,
            volatility_epsilon: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelingStrategy {
    /// Cut the composite score at batch percentiles
    Percentile,
    /// Cut the composite score at fixed values
    Threshold,
}

/// Weights and cut points of the dynamic labeler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelerConfig {
    pub growth_weight: f64,
    pub momentum_weight: f64,
    pub affordability_weight: f64,
    pub vacancy_weight: f64,
    pub high_percentile: f64,
    pub low_percentile: f64,
    pub strategy: LabelingStrategy,
    pub high_score_threshold: f64,
    pub low_score_threshold: f64,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            growth_weight: 0.40,
            momentum_weight: 0.20,
            affordability_weight: 0.20,
            vacancy_weight: 0.20,
            high_percentile: 0.80,
            low_percentile: 0.30,
            strategy: LabelingStrategy::Percentile,
            high_score_threshold: 0.65,
            low_score_threshold: 0.35,
        }
    }
}

impl LabelerConfig {
    pub fn weights(&self) -> [f64; 4] {
        [
            self.growth_weight,
            self.momentum_weight,
            self.affordability_weight,
            self.vacancy_weight,
        ]
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let names = ["growth_weight", "momentum_weight", "affordability_weight", "vacancy_weight"];

        for (name, weight) in names.iter().zip(self.weights()) {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(format!("labeler.{} must be between 0 and 1", name));
            }
        }
        let sum: f64 = self.weights().iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            errors.push(format!("labeler weights must sum to 1.0 (got {:.4})", sum));
        }
        if !(self.low_percentile > 0.0 && self.low_percentile < self.high_percentile && self.high_percentile < 1.0) {
            errors.push("labeler: require 0 < low_percentile < high_percentile < 1".to_string());
        }
        if !(self.low_score_threshold > 0.0
            && self.low_score_threshold < self.high_score_threshold
            && self.high_score_threshold < 1.0)
        {
            errors.push("labeler: require 0 < low_score_threshold < high_score_threshold < 1".to_string());
        }
        errors
    }
}

/// Stratified hold-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    pub test_ratio: f64,
    pub seed: u64,
    /// Explicit opt-in to stratify over the labels present when one class is absent
    pub allow_missing_classes: bool,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
            allow_missing_classes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.labeler.weights(), [0.40, 0.20, 0.20, 0.20]);
        assert_eq!(config.forest.profile, ForestProfile::Reference);
        assert_eq!(config.split.seed, 42);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = PipelineConfig {
            labeler: LabelerConfig {
                growth_weight: 0.5,
                ..LabelerConfig::default()
            },
            ..PipelineConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("sum to 1.0")));
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = PipelineConfig::default();
        config.labeler.low_percentile = 0.9;
        config.split.test_ratio = 1.5;
        config.forest.n_trees = 0;
        config.features.volatility_epsilon = 0.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
[labeler]
strategy = "threshold"
high_score_threshold = 0.7

[columns]
price_column = "2025-01-31"
"#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.labeler.strategy, LabelingStrategy::Threshold);
        assert_eq!(config.labeler.high_score_threshold, 0.7);
        assert_eq!(config.labeler.growth_weight, 0.40);
        assert_eq!(config.columns.price_column.as_deref(), Some("2025-01-31"));
        assert_eq!(config.columns.region_column, "RegionName");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[split]\ntest_ratio = 0.25\n\n[forest]\nn_trees = 50").unwrap();

        let config = PipelineConfig::load_with_env(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.split.test_ratio, 0.25);
        assert_eq!(config.forest.n_trees, 50);
        assert_eq!(config.forest.max_depth, 12);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[labeler]\nvacancy_weight = 0.9").unwrap();

        let err = PipelineConfig::load_with_env(Some(file.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidConfig(_)));
    }

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_fast_profile_fills_unset_forest_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[forest]\nprofile = \"fast\"").unwrap();

        let config = PipelineConfig::load_with_env(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.forest.profile, ForestProfile::Fast);
        assert_eq!(config.forest.n_trees, 200);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(config.forest.min_samples_split, 5);
        assert_eq!(config.forest.seed, 42);
    }

    #[test]
    fn test_explicit_forest_keys_override_profile() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[forest]\nprofile = \"fast\"\nn_trees = 120").unwrap();

        let config = PipelineConfig::load_with_env(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.forest.n_trees, 120);
        assert_eq!(config.forest.max_depth, 10);
        assert_eq!(config.forest.min_samples_split, 5);
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let err = PipelineConfig::load_with_env(None, env(&[("RANKER__FOREST__PROFILE", "huge")])).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidConfig(_)));
    }

    #[test]
    fn test_environment_overrides() {
        let config = PipelineConfig::load_with_env(
            None,
            env(&[
                ("RANKER__LABELER__GROWTH_WEIGHT", "0.3"),
                ("RANKER__LABELER__MOMENTUM_WEIGHT", "0.3"),
                ("RANKER__FOREST__PROFILE", "fast"),
                ("RANKER__SPLIT__SEED", "7"),
                ("OTHER__SPLIT__SEED", "9"),
            ]),
        )
        .unwrap();
        assert_eq!(config.labeler.growth_weight, 0.3);
        assert_eq!(config.labeler.momentum_weight, 0.3);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.forest.profile, ForestProfile::Fast);
        assert_eq!(config.forest.n_trees, 200);
    }

    #[test]
    fn test_environment_overrides_are_validated() {
        let err = PipelineConfig::load_with_env(None, env(&[("RANKER__LABELER__GROWTH_WEIGHT", "0.9")])).unwrap_err();
        match err {
            ScoringError::InvalidConfig(errors) => assert!(errors.iter().any(|e| e.contains("sum to 1.0"))),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[split]\ntest_ratio = 0.25\nseed = 1").unwrap();

        let config = PipelineConfig::load_with_env(Some(file.path()), env(&[("RANKER__SPLIT__SEED", "11")])).unwrap();
        assert_eq!(config.split.test_ratio, 0.25);
        assert_eq!(config.split.seed, 11);
    }
}
