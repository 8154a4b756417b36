use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::features::{FeatureBatch, RegionFeatures, FEATURE_NAMES};
use super::forest::{ForestConfig, RandomForest};
use super::persistence::{ModelMetrics, ModelVersion};
use super::split::stratified_split;
use crate::config::SplitSettings;
use crate::error::{Result, ScoringError};
use crate::types::InvestmentLabel;

/// Precision/recall for one label on the hold-out set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: InvestmentLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Training report after model fit
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub train_samples: usize,
    pub test_samples: usize,
    pub accuracy: f64,
    /// Labels across the whole batch, indexed by rank
    pub class_distribution: [usize; InvestmentLabel::COUNT],
    /// Rows are true labels, columns predicted labels, both by rank
    pub confusion_matrix: [[usize; InvestmentLabel::COUNT]; InvestmentLabel::COUNT],
    pub per_class: Vec<ClassMetrics>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub oob_accuracy: Option<f64>,
    /// (feature, importance), most important first
    pub feature_importances: Vec<(String, f64)>,
}

impl TrainingReport {
    pub fn top_features(&self, n: usize) -> Vec<&str> {
        self.feature_importances
            .iter()
            .take(n)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn metrics(&self) -> ModelMetrics {
        ModelMetrics {
            accuracy: self.accuracy,
            precision: self.macro_precision,
            recall: self.macro_recall,
            f1_score: self.macro_f1,
            oob_accuracy: self.oob_accuracy,
            train_samples: self.train_samples,
            test_samples: self.test_samples,
        }
    }
}

/// Everything inference needs, detached from the training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub model_id: Uuid,
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    /// Label encoding: forest class index i is `classes[i]`
    pub classes: Vec<InvestmentLabel>,
    pub reference_year: i32,
    pub forest: RandomForest,
    pub metrics: ModelMetrics,
}

impl ModelState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and check the state against this build's features and labels
    pub fn from_json(json: &str) -> Result<Self> {
        let state: ModelState = serde_json::from_str(json)?;
        state.check_compatible()?;
        Ok(state)
    }

    pub fn check_compatible(&self) -> Result<()> {
        if self.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES.iter().copied()) {
            return Err(ScoringError::IncompatibleModel(format!(
                "feature set {:?} does not match {:?}",
                self.feature_names, FEATURE_NAMES
            )));
        }
        if self.classes[..] != InvestmentLabel::all()[..] {
            return Err(ScoringError::IncompatibleModel(format!(
                "label table {:?} does not match {:?}",
                self.classes,
                InvestmentLabel::all()
            )));
        }
        if self.forest.n_features() != RegionFeatures::NUM_FEATURES
            || self.forest.n_classes() != InvestmentLabel::COUNT
        {
            return Err(ScoringError::IncompatibleModel(format!(
                "forest shape {}x{} does not match {}x{}",
                self.forest.n_features(),
                self.forest.n_classes(),
                RegionFeatures::NUM_FEATURES,
                InvestmentLabel::COUNT
            )));
        }
        Ok(())
    }

    /// Class probabilities per row, in `classes` order
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<Vec<f64>>> {
        ensure_finite(x)?;
        Ok(self.forest.predict_proba(x))
    }
}

/// Random forest classifier trained on the labeler's output
pub struct InvestmentClassifier {
    forest: ForestConfig,
    split: SplitSettings,
}

impl InvestmentClassifier {
    pub fn new(forest: ForestConfig, split: SplitSettings) -> Self {
        Self { forest, split }
    }

    /// Stratified hold-out fit: train on the training split, score on the test split
    pub fn train(&self, batch: &FeatureBatch, labels: &[InvestmentLabel]) -> Result<(ModelState, TrainingReport)> {
        let rows = batch.len();
        if labels.len() != rows {
            return Err(ScoringError::InsufficientData {
                reason: format!("{} labels for {} feature rows", labels.len(), rows),
                rows,
            });
        }

        let x = batch.to_matrix();
        ensure_finite(&x)?;
        let y: Vec<usize> = labels.iter().map(|l| l.rank()).collect();

        let split = stratified_split(&y, InvestmentLabel::COUNT, &self.split)?;
        let x_train = x.select(Axis(0), &split.train);
        let y_train: Vec<usize> = split.train.iter().map(|&i| y[i]).collect();
        let x_test = x.select(Axis(0), &split.test);
        let y_test: Vec<usize> = split.test.iter().map(|&i| y[i]).collect();

        let forest = RandomForest::fit(self.forest.clone(), &x_train, &y_train, InvestmentLabel::COUNT)?;
        debug!("Class weights: {:?}", forest.class_weights());

        let predicted = forest.predict(&x_test);
        let evaluation = Evaluation::new(&y_test, &predicted);

        let mut class_distribution = [0usize; InvestmentLabel::COUNT];
        for &c in &y {
            class_distribution[c] += 1;
        }

        let feature_importances: Vec<(String, f64)> = forest
            .feature_importance_ranking()
            .into_iter()
            .map(|(idx, imp)| (FEATURE_NAMES[idx].to_string(), imp))
            .collect();

        let report = TrainingReport {
            train_samples: split.train.len(),
            test_samples: split.test.len(),
            accuracy: evaluation.accuracy,
            class_distribution,
            confusion_matrix: evaluation.confusion,
            per_class: evaluation.per_class,
            macro_precision: evaluation.macro_precision,
            macro_recall: evaluation.macro_recall,
            macro_f1: evaluation.macro_f1,
            oob_accuracy: forest.oob_accuracy(),
            feature_importances,
        };

        info!(
            "Forest trained: {} train / {} test, {:.1}% accuracy, macro F1 {:.3}",
            report.train_samples,
            report.test_samples,
            report.accuracy * 100.0,
            report.macro_f1
        );
        info!("Top features: {}", report.top_features(3).join(", "));

        let state = ModelState {
            model_id: Uuid::new_v4(),
            version: ModelVersion::initial(),
            trained_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classes: InvestmentLabel::all().to_vec(),
            reference_year: batch.reference_year,
            forest,
            metrics: report.metrics(),
        };

        Ok((state, report))
    }
}

/// Non-finite cells are reported per feature column
fn ensure_finite(x: &Array2<f64>) -> Result<()> {
    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        let bad = column.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(ScoringError::MissingFeature {
                column: FEATURE_NAMES.get(j).map_or_else(|| format!("feature_{}", j), |s| s.to_string()),
                rows: bad,
            });
        }
    }
    Ok(())
}

struct Evaluation {
    accuracy: f64,
    confusion: [[usize; InvestmentLabel::COUNT]; InvestmentLabel::COUNT],
    per_class: Vec<ClassMetrics>,
    macro_precision: f64,
    macro_recall: f64,
    macro_f1: f64,
}

impl Evaluation {
    /// Macro averages cover labels that occur in either the truth or the predictions
    fn new(truth: &[usize], predicted: &[usize]) -> Self {
        let mut confusion = [[0usize; InvestmentLabel::COUNT]; InvestmentLabel::COUNT];
        for (&t, &p) in truth.iter().zip(predicted) {
            confusion[t][p] += 1;
        }

        let correct: usize = (0..InvestmentLabel::COUNT).map(|c| confusion[c][c]).sum();
        let accuracy = if truth.is_empty() {
            0.0
        } else {
            correct as f64 / truth.len() as f64
        };

        let mut per_class = Vec::new();
        for (c, label) in InvestmentLabel::all().into_iter().enumerate() {
            let support: usize = confusion[c].iter().sum();
            let predicted_as: usize = (0..InvestmentLabel::COUNT).map(|t| confusion[t][c]).sum();
            if support == 0 && predicted_as == 0 {
                continue;
            }
            let tp = confusion[c][c] as f64;
            let precision = if predicted_as > 0 { tp / predicted_as as f64 } else { 0.0 };
            let recall = if support > 0 { tp / support as f64 } else { 0.0 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class.push(ClassMetrics {
                label,
                precision,
                recall,
                f1,
                support,
            });
        }

        let n = per_class.len().max(1) as f64;
        let macro_precision = per_class.iter().map(|m| m.precision).sum::<f64>() / n;
        let macro_recall = per_class.iter().map(|m| m.recall).sum::<f64>() / n;
        let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / n;

        Self {
            accuracy,
            confusion,
            per_class,
            macro_precision,
            macro_recall,
            macro_f1,
        }
    }
}
