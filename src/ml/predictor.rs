use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use super::features::FeatureBatch;
use super::forest::argmax;
use super::model::ModelState;
use crate::error::{Result, ScoringError};
use crate::types::{InvestmentLabel, RegionBatch, RegionId};

/// One ranked region in the output table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub region_id: RegionId,
    pub city: String,
    pub state: String,
    /// Whole currency units; `None` when the price cell was missing
    pub current_price: Option<Decimal>,
    pub classification: InvestmentLabel,
    pub confidence_pct: Decimal,
    pub growth_pct: Decimal,
    pub affordability: Decimal,
    pub vacancy_pct: Decimal,
    pub momentum_pct: Decimal,
}

/// Ranked output of a prediction run
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    /// Year behind the `Growth_<year>_Pct` column
    pub reference_year: i32,
    pub rows: Vec<RankedResult>,
}

impl ResultTable {
    pub fn headers(&self) -> Vec<String> {
        vec![
            "RegionName".to_string(),
            "City".to_string(),
            "State".to_string(),
            "Current_Price".to_string(),
            "Classification".to_string(),
            "Confidence_Pct".to_string(),
            format!("Growth_{}_Pct", self.reference_year),
            "Affordability".to_string(),
            "Vacancy_Pct".to_string(),
            "Momentum_Pct".to_string(),
        ]
    }

    /// Rows as text cells in header order
    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|r| {
                vec![
                    r.region_id.to_string(),
                    r.city.clone(),
                    r.state.clone(),
                    r.current_price.map(|p| p.to_string()).unwrap_or_default(),
                    r.classification.to_string(),
                    one_decimal(r.confidence_pct),
                    one_decimal(r.growth_pct),
                    one_decimal(r.affordability),
                    one_decimal(r.vacancy_pct),
                    one_decimal(r.momentum_pct),
                ]
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Counts indexed by label rank
    pub fn label_counts(&self) -> [usize; InvestmentLabel::COUNT] {
        let mut counts = [0; InvestmentLabel::COUNT];
        for row in &self.rows {
            counts[row.classification.rank()] += 1;
        }
        counts
    }
}

fn one_decimal(value: Decimal) -> String {
    format!("{:.1}", value)
}

/// Label rank, then rounded confidence (high first), then region id
pub fn rank_results(rows: &mut [RankedResult]) {
    rows.sort_by(|a, b| {
        a.classification
            .rank()
            .cmp(&b.classification.rank())
            .then_with(|| b.confidence_pct.cmp(&a.confidence_pct))
            .then_with(|| a.region_id.cmp(&b.region_id))
    });
}

/// Value rounded half-to-even to `dp` places
fn rounded(value: f64, dp: u32, column: &str) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(dp))
        .ok_or_else(|| ScoringError::MissingFeature {
            column: column.to_string(),
            rows: 1,
        })
}

fn percent(value: f64, column: &str) -> Result<Decimal> {
    rounded(value * 100.0, 1, column)
}

/// Classify and rank every region of the batch with a trained model
pub fn predict_and_rank(model: &ModelState, regions: &RegionBatch, features: &FeatureBatch) -> Result<ResultTable> {
    if regions.len() != features.len() {
        return Err(ScoringError::InsufficientData {
            reason: format!("{} regions for {} feature rows", regions.len(), features.len()),
            rows: regions.len(),
        });
    }
    if features.reference_year != model.reference_year {
        warn!(
            "Model trained on reference year {}, scoring year {}",
            model.reference_year, features.reference_year
        );
    }

    let probabilities = model.predict_proba(&features.to_matrix())?;

    let mut rows = Vec::with_capacity(regions.len());
    for ((record, feat), probs) in regions.records.iter().zip(&features.features).zip(&probabilities) {
        let class = argmax(probs);
        let classification = model.classes.get(class).copied().ok_or_else(|| {
            ScoringError::IncompatibleModel(format!("class index {} outside label table", class))
        })?;

        let current_price = match record.current_price {
            Some(price) => Some(rounded(price, 0, "current_price")?),
            None => None,
        };

        rows.push(RankedResult {
            region_id: record.region_id.clone(),
            city: record.city.clone(),
            state: record.state.clone(),
            current_price,
            classification,
            confidence_pct: percent(probs[class], "confidence")?,
            growth_pct: percent(feat.growth_latest, "growth_latest")?,
            affordability: rounded(feat.affordability_ratio, 1, "affordability_ratio")?,
            vacancy_pct: percent(feat.vacancy_rate, "vacancy_rate")?,
            momentum_pct: percent(feat.growth_momentum, "growth_momentum")?,
        });
    }

    rank_results(&mut rows);

    let table = ResultTable {
        reference_year: features.reference_year,
        rows,
    };
    let counts = table.label_counts();
    info!(
        "Ranked {} regions: {} HighPotential, {} Stable, {} LowPotential",
        table.len(),
        counts[0],
        counts[1],
        counts[2]
    );

    Ok(table)
}
