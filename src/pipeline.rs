//! Train → predict orchestration over one raw table

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{Result, ScoringError};
use crate::ml::labeler::{DynamicLabeler, LabelingOutcome};
use crate::ml::model::{InvestmentClassifier, ModelState, TrainingReport};
use crate::ml::predictor::{predict_and_rank, ResultTable};
use crate::ml::FeatureBatch;
use crate::types::{RawTable, RegionBatch};

/// Everything a one-shot ranking run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub model: ModelState,
    pub report: TrainingReport,
    pub results: ResultTable,
    pub labeling: LabelingOutcome,
}

pub struct InvestmentPipeline {
    config: PipelineConfig,
    labeler: DynamicLabeler,
    classifier: InvestmentClassifier,
}

impl InvestmentPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate().map_err(ScoringError::InvalidConfig)?;
        let labeler = DynamicLabeler::new(config.labeler.clone())?;
        let classifier = InvestmentClassifier::new(config.forest.clone(), config.split.clone());
        Ok(Self {
            config,
            labeler,
            classifier,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parse the table and engineer imputed features
    pub fn prepare(&self, table: &RawTable) -> Result<(RegionBatch, FeatureBatch)> {
        let regions = RegionBatch::from_table(table, &self.config.columns, self.config.features.reference_year)?;
        let features = FeatureBatch::engineer(&regions, &self.config.features)?;
        Ok((regions, features))
    }

    /// Dynamic labels for the batch, without training
    pub fn label(&self, table: &RawTable) -> Result<LabelingOutcome> {
        let (_, features) = self.prepare(table)?;
        self.labeler.label(&features.features)
    }

    pub fn train(&self, table: &RawTable) -> Result<(ModelState, TrainingReport)> {
        let (_, features) = self.prepare(table)?;
        let (model, report, _) = self.fit(&features)?;
        Ok((model, report))
    }

    /// Score a batch with an already trained model
    pub fn predict(&self, model: &ModelState, table: &RawTable) -> Result<ResultTable> {
        model.check_compatible()?;
        let (regions, features) = self.prepare(table)?;
        predict_and_rank(model, &regions, &features)
    }

    /// Label, train and rank the same batch in one pass
    pub fn run(&self, table: &RawTable) -> Result<PipelineOutput> {
        let (regions, features) = self.prepare(table)?;
        let (model, report, labeling) = self.fit(&features)?;
        let results = predict_and_rank(&model, &regions, &features)?;

        info!(
            "Pipeline finished: {} regions ranked (reference year {})",
            results.len(),
            results.reference_year
        );

        Ok(PipelineOutput {
            model,
            report,
            results,
            labeling,
        })
    }

    fn fit(&self, features: &FeatureBatch) -> Result<(ModelState, TrainingReport, LabelingOutcome)> {
        info!(
            "Training on {} regions (reference year {})",
            features.len(),
            features.reference_year
        );
        let labeling = self.labeler.label(&features.features)?;
        let (model, report) = self.classifier.train(features, &labeling.labels)?;
        Ok((model, report, labeling))
    }
}
