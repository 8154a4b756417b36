pub mod features;
pub mod forest;
pub mod labeler;
pub mod model;
pub mod persistence;
pub mod predictor;
pub mod split;

pub use features::{FeatureBatch, RegionFeatures, FEATURE_NAMES};
pub use forest::{ClassBalance, ForestConfig, RandomForest};
pub use labeler::{DegenerateNormalization, DynamicLabeler, LabelingOutcome};
pub use model::{InvestmentClassifier, ModelState, TrainingReport};
pub use persistence::{ModelMetrics, ModelStore, ModelVersion};
pub use predictor::{predict_and_rank, RankedResult, ResultTable};
