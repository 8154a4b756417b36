//! Error types for the scoring pipeline

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, ScoringError>;

/// Errors raised while scoring, training or ranking a batch.
///
/// Data-quality variants carry the offending column or condition plus the
/// number of affected rows so callers can report them without a trace.
#[derive(Error, Debug)]
pub enum ScoringError {
    /// A required raw input column is absent from the batch
    #[error("missing required column '{column}' ({rows} rows in batch)")]
    MissingColumn { column: String, rows: usize },

    /// A model feature has no usable value (cannot be imputed or not finite)
    #[error("feature '{column}' has {rows} unfilled values")]
    MissingFeature { column: String, rows: usize },

    /// Batch too small or too imbalanced for labeling or stratified evaluation
    #[error("insufficient data: {reason} ({rows} rows)")]
    InsufficientData { reason: String, rows: usize },

    /// A cell could not be parsed
    #[error("invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    /// Two rows normalize to the same region id
    #[error("region id '{region_id}' appears in {rows} rows")]
    DuplicateRegion { region_id: String, rows: usize },

    /// Configuration failed validation
    #[error("invalid configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),

    /// Serialized model does not match this build's feature set or classes
    #[error("incompatible model: {0}")]
    IncompatibleModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ScoringError {
    /// True for errors caused by the input batch rather than the environment
    pub fn is_data_quality(&self) -> bool {
        matches!(
            self,
            ScoringError::MissingColumn { .. }
                | ScoringError::MissingFeature { .. }
                | ScoringError::InsufficientData { .. }
                | ScoringError::InvalidValue { .. }
                | ScoringError::DuplicateRegion { .. }
        )
    }
}
