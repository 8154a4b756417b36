//! Scores postal-code real-estate markets by investment potential.
//!
//! A batch of regions goes through feature engineering, batch-relative
//! labeling, a random forest trained on those labels, and finally a ranked
//! result table. Training and inference meet at a serializable [`ModelState`].

pub mod config;
pub mod error;
pub mod io;
pub mod ml;
pub mod pipeline;
pub mod types;

pub use crate::config::PipelineConfig;
pub use error::{Result, ScoringError};
pub use ml::{ModelState, ModelStore, ResultTable, TrainingReport};
pub use pipeline::{InvestmentPipeline, PipelineOutput};
pub use types::{InvestmentLabel, RawTable, RegionId};
