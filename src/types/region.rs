use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, ScoringError};

/// Width of a canonical region code (US ZIP)
pub const REGION_ID_WIDTH: usize = 5;

/// Canonical, zero-padded postal/region code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Normalize a raw identifier: trim, drop a trailing decimal artifact
    /// (`06010.0`, `6010.`) and left-pad with zeros.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let code = match trimmed.find('.') {
            Some(dot) if trimmed[dot + 1..].chars().all(|c| c == '0') => &trimmed[..dot],
            _ => trimmed,
        };
        if code.is_empty() {
            return None;
        }
        Some(Self(format!("{:0>width$}", code, width = REGION_ID_WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One geographic market as read from the input table.
/// Treated as read-only: derived fields live in `ml::features::FeatureBatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub region_id: RegionId,
    pub city: String,
    pub state: String,
    pub current_price: Option<f64>,
    /// Sparse year -> fractional growth rate
    pub growth_by_year: BTreeMap<i32, f64>,
    pub vacancy_rate: Option<f64>,
    pub affordability_ratio: Option<f64>,
}

impl RegionRecord {
    pub fn growth(&self, year: i32) -> Option<f64> {
        self.growth_by_year.get(&year).copied()
    }
}

/// Reject batches where two rows share a normalized region id
pub fn ensure_unique_ids(records: &[RegionRecord]) -> Result<()> {
    let mut counts: BTreeMap<&RegionId, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(&record.region_id).or_insert(0) += 1;
    }
    match counts.into_iter().find(|(_, n)| *n > 1) {
        Some((id, n)) => Err(ScoringError::DuplicateRegion {
            region_id: id.to_string(),
            rows: n,
        }),
        None => Ok(()),
    }
}
