use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::RegionFeatures;
use crate::config::{LabelerConfig, LabelingStrategy};
use crate::error::{Result, ScoringError};
use crate::types::InvestmentLabel;

/// Normalized value used for every row of a constant column
pub const DEGENERATE_FILL: f64 = 0.5;

/// Scoring inputs, in composite-weight order
const SCORE_INPUTS: [&str; 4] = ["growth_latest", "growth_momentum", "affordability_ratio", "vacancy_rate"];

/// A scoring input was constant across the batch (max == min), so its
/// normalized value carries no ranking information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegenerateNormalization {
    pub column: String,
    pub rows: usize,
}

/// Labels plus everything needed to explain them
#[derive(Debug, Clone)]
pub struct LabelingOutcome {
    pub scores: Vec<f64>,
    pub labels: Vec<InvestmentLabel>,
    /// Score at or above which a region is HighPotential
    pub high_cut: f64,
    /// Score at or below which a region is LowPotential
    pub low_cut: f64,
    pub warnings: Vec<DegenerateNormalization>,
}

impl LabelingOutcome {
    /// Counts indexed by label rank
    pub fn class_counts(&self) -> [usize; InvestmentLabel::COUNT] {
        let mut counts = [0; InvestmentLabel::COUNT];
        for label in &self.labels {
            counts[label.rank()] += 1;
        }
        counts
    }

    pub fn distinct_labels(&self) -> usize {
        self.class_counts().iter().filter(|&&c| c > 0).count()
    }
}

/// Min-max rescale to [0, 1]. Returns `None` when the column is constant.
pub fn min_max_normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if values.is_empty() || range.is_nan() || range <= 0.0 {
        return None;
    }
    Some(values.iter().map(|v| (v - min) / range).collect())
}

/// Percentile with linear interpolation between order statistics (`q` in [0, 1])
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Turns a batch of features into ordinal labels using within-batch statistics
#[derive(Debug, Clone)]
pub struct DynamicLabeler {
    config: LabelerConfig,
}

impl DynamicLabeler {
    pub fn new(config: LabelerConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ScoringError::InvalidConfig(errors));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }

    /// Weighted composite score in [0, 1] per region, plus degenerate-column warnings
    pub fn composite_scores(&self, features: &[RegionFeatures]) -> (Vec<f64>, Vec<DegenerateNormalization>) {
        let n = features.len();
        let columns: [Vec<f64>; 4] = [
            features.iter().map(|f| f.growth_latest).collect(),
            features.iter().map(|f| f.growth_momentum).collect(),
            features.iter().map(|f| f.affordability_ratio).collect(),
            features.iter().map(|f| f.vacancy_rate).collect(),
        ];

        let mut warnings = Vec::new();
        let normalized: Vec<Vec<f64>> = columns
            .iter()
            .zip(SCORE_INPUTS)
            .map(|(values, name)| {
                min_max_normalize(values).unwrap_or_else(|| {
                    warn!(
                        "Column '{}' is constant across {} rows; normalized to {}",
                        name, n, DEGENERATE_FILL
                    );
                    warnings.push(DegenerateNormalization {
                        column: name.to_string(),
                        rows: n,
                    });
                    vec![DEGENERATE_FILL; n]
                })
            })
            .collect();

        let [wg, wm, wa, wv] = self.config.weights();
        let scores = (0..n)
            .map(|i| {
                wg * normalized[0][i]
                    + wm * normalized[1][i]
                    + wa * (1.0 - normalized[2][i])
                    + wv * (1.0 - normalized[3][i])
            })
            .collect();

        (scores, warnings)
    }

    /// Label every region; boundaries are inclusive toward the extreme classes
    pub fn label(&self, features: &[RegionFeatures]) -> Result<LabelingOutcome> {
        if features.is_empty() {
            return Err(ScoringError::InsufficientData {
                reason: "cannot label an empty batch".to_string(),
                rows: 0,
            });
        }

        let (scores, warnings) = self.composite_scores(features);

        let (high_cut, low_cut) = match self.config.strategy {
            LabelingStrategy::Percentile => (
                percentile(&scores, self.config.high_percentile),
                percentile(&scores, self.config.low_percentile),
            ),
            LabelingStrategy::Threshold => (
                self.config.high_score_threshold,
                self.config.low_score_threshold,
            ),
        };

        let labels = scores
            .iter()
            .map(|&score| {
                if score >= high_cut {
                    InvestmentLabel::HighPotential
                } else if score <= low_cut {
                    InvestmentLabel::LowPotential
                } else {
                    InvestmentLabel::Stable
                }
            })
            .collect();

        let outcome = LabelingOutcome {
            scores,
            labels,
            high_cut,
            low_cut,
            warnings,
        };

        let counts = outcome.class_counts();
        let n = features.len() as f64;
        info!(
            "Label distribution: HighPotential {:.1}% | Stable {:.1}% | LowPotential {:.1}% (cuts {:.3}/{:.3})",
            counts[0] as f64 / n * 100.0,
            counts[1] as f64 / n * 100.0,
            counts[2] as f64 / n * 100.0,
            outcome.high_cut,
            outcome.low_cut,
        );

        Ok(outcome)
    }
}
