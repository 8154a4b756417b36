use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureSettings;
use crate::error::{Result, ScoringError};
use crate::types::{RegionBatch, RegionRecord};

/// Model input columns, in matrix order
pub const FEATURE_NAMES: [&str; RegionFeatures::NUM_FEATURES] = [
    "growth_prev",
    "growth_latest",
    "growth_trend_3y",
    "vacancy_rate",
    "affordability_ratio",
    "growth_momentum",
    "market_stability",
];

/// Fixed-size feature vector for one region, every value filled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionFeatures {
    /// Growth of year y-1
    pub growth_prev: f64,
    /// Growth of the reference year y
    pub growth_latest: f64,
    pub growth_trend_3y: f64,
    pub vacancy_rate: f64,
    pub affordability_ratio: f64,
    pub growth_momentum: f64,
    pub market_stability: f64,
}

impl RegionFeatures {
    pub const NUM_FEATURES: usize = 7;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.growth_prev,
            self.growth_latest,
            self.growth_trend_3y,
            self.vacancy_rate,
            self.affordability_ratio,
            self.growth_momentum,
            self.market_stability,
        ]
    }

    fn from_array(values: [f64; Self::NUM_FEATURES]) -> Self {
        Self {
            growth_prev: values[0],
            growth_latest: values[1],
            growth_trend_3y: values[2],
            vacancy_rate: values[3],
            affordability_ratio: values[4],
            growth_momentum: values[5],
            market_stability: values[6],
        }
    }
}

/// Acceleration: mean(g[y], g[y-1]) - mean(g[y-2], g[y-3]).
/// Missing when any of the four years is missing.
pub fn growth_momentum(record: &RegionRecord, year: i32) -> Option<f64> {
    let recent = (record.growth(year)? + record.growth(year - 1)?) / 2.0;
    let past = (record.growth(year - 2)? + record.growth(year - 3)?) / 2.0;
    Some(recent - past)
}

/// Mean growth over y-2..=y, ignoring missing years
pub fn growth_trend_3y(record: &RegionRecord, year: i32) -> Option<f64> {
    let values: Vec<f64> = ((year - 2)..=year).filter_map(|y| record.growth(y)).collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation of growth over y-3..=y (needs two observed years)
pub fn growth_volatility(record: &RegionRecord, year: i32) -> Option<f64> {
    let values: Vec<f64> = ((year - 3)..=year).filter_map(|y| record.growth(y)).collect();
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    std_dev.is_finite().then_some(std_dev)
}

/// Inverse volatility; finite and positive for any finite volatility when epsilon > 0
pub fn market_stability(volatility: f64, epsilon: f64) -> f64 {
    1.0 / (volatility + epsilon)
}

/// Median of the given values, `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn raw_features(record: &RegionRecord, year: i32, epsilon: f64) -> [Option<f64>; RegionFeatures::NUM_FEATURES] {
    [
        record.growth(year - 1),
        record.growth(year),
        growth_trend_3y(record, year),
        record.vacancy_rate,
        record.affordability_ratio,
        growth_momentum(record, year),
        growth_volatility(record, year).map(|v| market_stability(v, epsilon)),
    ]
}

/// Engineered, fully imputed features for a whole batch.
/// Owned working copy: the source records are never modified.
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    pub reference_year: i32,
    pub features: Vec<RegionFeatures>,
    /// Batch medians used to fill missing cells, per feature
    pub medians: [f64; RegionFeatures::NUM_FEATURES],
    /// Number of filled cells, per feature
    pub imputed: [usize; RegionFeatures::NUM_FEATURES],
}

impl FeatureBatch {
    /// Derive momentum/trend/stability and fill gaps with batch medians
    pub fn engineer(batch: &RegionBatch, settings: &FeatureSettings) -> Result<Self> {
        let year = batch.reference_year;
        let rows = batch.len();
        let raw: Vec<_> = batch
            .records
            .iter()
            .map(|r| raw_features(r, year, settings.volatility_epsilon))
            .collect();

        let mut medians = [0.0; RegionFeatures::NUM_FEATURES];
        let mut imputed = [0usize; RegionFeatures::NUM_FEATURES];
        for j in 0..RegionFeatures::NUM_FEATURES {
            let observed: Vec<f64> = raw.iter().filter_map(|r| r[j]).collect();
            imputed[j] = rows - observed.len();
            medians[j] = median(&observed).ok_or_else(|| ScoringError::MissingFeature {
                column: FEATURE_NAMES[j].to_string(),
                rows,
            })?;
        }

        let features = raw
            .iter()
            .map(|r| {
                let mut values = [0.0; RegionFeatures::NUM_FEATURES];
                for j in 0..RegionFeatures::NUM_FEATURES {
                    values[j] = r[j].unwrap_or(medians[j]);
                }
                RegionFeatures::from_array(values)
            })
            .collect();

        for (name, count) in FEATURE_NAMES.iter().zip(imputed.iter()) {
            if *count > 0 {
                debug!("Imputed {} missing '{}' values with batch median", count, name);
            }
        }

        Ok(Self {
            reference_year: year,
            features,
            medians,
            imputed,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Values of one feature column
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.features.iter().map(|f| f.to_array()[index]).collect()
    }

    /// Row-major feature matrix (regions x features)
    pub fn to_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.len(), RegionFeatures::NUM_FEATURES), |(i, j)| {
            self.features[i].to_array()[j]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionId;
    use std::collections::BTreeMap;

    fn record(id: &str, growth: &[(i32, f64)], vacancy: Option<f64>, affordability: Option<f64>) -> RegionRecord {
        RegionRecord {
            region_id: RegionId::parse(id).unwrap(),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            current_price: Some(400000.0),
            growth_by_year: growth.iter().copied().collect::<BTreeMap<_, _>>(),
            vacancy_rate: vacancy,
            affordability_ratio: affordability,
        }
    }

    fn full_growth(values: [f64; 5]) -> Vec<(i32, f64)> {
        (2021..=2025).zip(values).collect()
    }

    fn batch(records: Vec<RegionRecord>) -> RegionBatch {
        RegionBatch {
            records,
            reference_year: 2025,
            price_column: "2025-01-31".to_string(),
        }
    }

    #[test]
    fn test_derived_metrics() {
        let r = record("78701", &full_growth([0.10, 0.02, 0.04, 0.06, 0.08]), Some(0.05), Some(4.0));

        // (0.08 + 0.06)/2 - (0.04 + 0.02)/2
        assert!((growth_momentum(&r, 2025).unwrap() - 0.04).abs() < 1e-12);
        assert!((growth_trend_3y(&r, 2025).unwrap() - 0.06).abs() < 1e-12);

        // sample std of [0.02, 0.04, 0.06, 0.08]
        let expected_std = (0.002f64 / 3.0).sqrt();
        assert!((growth_volatility(&r, 2025).unwrap() - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_requires_all_four_years() {
        let r = record("78701", &[(2025, 0.05), (2024, 0.04), (2023, 0.03)], None, None);
        assert!(growth_momentum(&r, 2025).is_none());
        assert!((growth_trend_3y(&r, 2025).unwrap() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_stability_positive_for_flat_growth() {
        let r = record("78701", &full_growth([0.5; 5]), Some(0.05), Some(4.0));
        let vol = growth_volatility(&r, 2025).unwrap();
        assert_eq!(vol, 0.0);
        let stability = market_stability(vol, 0.001);
        assert!(stability.is_finite() && stability > 0.0);
        assert!((stability - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_stability_positive_for_random_batches() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let scale = 10f64.powi(rng.gen_range(-4..4));
            let flat = rng.gen_bool(0.2);
            let base = rng.gen_range(-1.0..1.0) * scale;
            let values = [0; 5].map(|_| if flat { base } else { rng.gen_range(-1.0..1.0) * scale });
            let r = record("00501", &full_growth(values), Some(0.1), Some(3.0));

            let features = FeatureBatch::engineer(&batch(vec![r]), &FeatureSettings::default()).unwrap();
            let stability = features.features[0].market_stability;
            assert!(stability.is_finite() && stability > 0.0, "stability {}", stability);
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_missing_vacancy_filled_with_median() {
        let records = vec![
            record("00001", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.02), Some(3.0)),
            record("00002", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.10), Some(4.0)),
            record("00003", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), None, Some(5.0)),
            record("00004", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.06), Some(6.0)),
        ];
        let source = batch(records);
        let features = FeatureBatch::engineer(&source, &FeatureSettings::default()).unwrap();

        assert_eq!(features.len(), 4);
        assert_eq!(features.features[2].vacancy_rate, 0.06);
        assert_eq!(features.imputed[3], 1);
        assert_eq!(features.imputed[4], 0);
        // source batch untouched
        assert_eq!(source.records[2].vacancy_rate, None);
    }

    #[test]
    fn test_column_missing_everywhere_is_an_error() {
        let records = vec![
            record("00001", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.02), None),
            record("00002", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.10), None),
        ];
        let err = FeatureBatch::engineer(&batch(records), &FeatureSettings::default()).unwrap_err();
        match err {
            ScoringError::MissingFeature { column, rows } => {
                assert_eq!(column, "affordability_ratio");
                assert_eq!(rows, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_matrix_layout() {
        let records = vec![
            record("00001", &full_growth([0.01, 0.02, 0.03, 0.04, 0.05]), Some(0.02), Some(3.0)),
            record("00002", &full_growth([0.05, 0.04, 0.03, 0.02, 0.01]), Some(0.10), Some(4.0)),
        ];
        let features = FeatureBatch::engineer(&batch(records), &FeatureSettings::default()).unwrap();
        let matrix = features.to_matrix();
        assert_eq!(matrix.dim(), (2, RegionFeatures::NUM_FEATURES));
        assert_eq!(matrix[[0, 1]], 0.05);
        assert_eq!(matrix[[1, 4]], 4.0);
        assert_eq!(features.column(0), vec![0.04, 0.02]);
    }
}
