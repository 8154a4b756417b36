use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::region::{ensure_unique_ids, RegionId, RegionRecord};
use crate::config::ColumnMapping;
use crate::error::{Result, ScoringError};

/// Cell texts treated as missing values
const MISSING_TOKENS: [&str; 5] = ["", "na", "nan", "null", "none"];

/// In-memory delimited table handed over by a loader
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Cell text, empty when the row is shorter than the header
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    /// Growth columns keyed by year: every `<prefix><YYYY>` header
    pub fn growth_columns(&self, prefix: &str) -> BTreeMap<i32, usize> {
        self.headers
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| {
                let year: i32 = h.trim().strip_prefix(prefix)?.parse().ok()?;
                Some((year, idx))
            })
            .collect()
    }

    /// Most recent header that parses as a `YYYY-MM-DD` date
    pub fn latest_dated_column(&self) -> Option<(NaiveDate, usize)> {
        self.headers
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| {
                NaiveDate::parse_from_str(h.trim(), "%Y-%m-%d")
                    .ok()
                    .map(|d| (d, idx))
            })
            .max_by_key(|(d, _)| *d)
    }
}

/// Parsed, validated batch of region records
#[derive(Debug, Clone)]
pub struct RegionBatch {
    pub records: Vec<RegionRecord>,
    /// Year `y` of the momentum/trend windows
    pub reference_year: i32,
    /// Header the current price was read from
    pub price_column: String,
}

impl RegionBatch {
    /// Validate required columns and parse every row.
    /// Fails before reading any row if a required column is absent.
    pub fn from_table(
        table: &RawTable,
        columns: &ColumnMapping,
        reference_year: Option<i32>,
    ) -> Result<Self> {
        let rows = table.len();
        if table.is_empty() {
            return Err(ScoringError::InsufficientData {
                reason: "input table has no rows".to_string(),
                rows,
            });
        }

        let require = |name: &str| -> Result<usize> {
            table.column_index(name).ok_or_else(|| ScoringError::MissingColumn {
                column: name.to_string(),
                rows,
            })
        };

        let region_idx = require(&columns.region_column)?;
        let city_idx = require(&columns.city_column)?;
        let state_idx = require(&columns.state_column)?;
        let vacancy_idx = require(&columns.vacancy_column)?;
        let affordability_idx = require(&columns.affordability_column)?;

        let growth_columns = table.growth_columns(&columns.growth_prefix);
        let year = match reference_year.or_else(|| growth_columns.keys().next_back().copied()) {
            Some(year) => year,
            None => {
                return Err(ScoringError::MissingColumn {
                    column: format!("{}<year>", columns.growth_prefix),
                    rows,
                })
            }
        };
        for needed in (year - 3)..=year {
            if !growth_columns.contains_key(&needed) {
                return Err(ScoringError::MissingColumn {
                    column: format!("{}{}", columns.growth_prefix, needed),
                    rows,
                });
            }
        }

        let (price_column, price_idx) = resolve_price_column(table, columns)?;

        let mut records = Vec::with_capacity(rows);
        for row in 0..rows {
            let raw_id = table.cell(row, region_idx);
            let region_id = RegionId::parse(raw_id).ok_or_else(|| ScoringError::InvalidValue {
                column: columns.region_column.clone(),
                row: row + 1,
                value: raw_id.to_string(),
            })?;

            let mut growth_by_year = BTreeMap::new();
            for (&growth_year, &idx) in &growth_columns {
                if let Some(rate) = parse_number(table, row, idx)? {
                    growth_by_year.insert(growth_year, rate);
                }
            }

            records.push(RegionRecord {
                region_id,
                city: table.cell(row, city_idx).trim().to_string(),
                state: table.cell(row, state_idx).trim().to_string(),
                current_price: parse_number(table, row, price_idx)?,
                growth_by_year,
                vacancy_rate: parse_number(table, row, vacancy_idx)?,
                affordability_ratio: parse_number(table, row, affordability_idx)?,
            });
        }

        ensure_unique_ids(&records)?;

        debug!(
            "Parsed {} regions (reference year {}, price column '{}')",
            records.len(),
            year,
            price_column
        );

        Ok(Self {
            records,
            reference_year: year,
            price_column,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Primary price column (explicit or latest dated header), then the
/// caller's fallback list. No positional guessing.
fn resolve_price_column(table: &RawTable, columns: &ColumnMapping) -> Result<(String, usize)> {
    let primary = match &columns.price_column {
        Some(name) => table.column_index(name).map(|idx| (name.clone(), idx)),
        None => table
            .latest_dated_column()
            .map(|(_, idx)| (table.headers[idx].trim().to_string(), idx)),
    };
    if let Some(found) = primary {
        return Ok(found);
    }

    for fallback in &columns.price_fallback_columns {
        if let Some(idx) = table.column_index(fallback) {
            warn!("Price column not found, using fallback column '{}'", fallback);
            return Ok((fallback.clone(), idx));
        }
    }

    Err(ScoringError::MissingColumn {
        column: columns
            .price_column
            .clone()
            .unwrap_or_else(|| "<YYYY-MM-DD price column>".to_string()),
        rows: table.len(),
    })
}

fn parse_number(table: &RawTable, row: usize, col: usize) -> Result<Option<f64>> {
    let text = table.cell(row, col).trim();
    if MISSING_TOKENS.contains(&text.to_lowercase().as_str()) {
        return Ok(None);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(ScoringError::InvalidValue {
            column: table.headers[col].clone(),
            row: row + 1,
            value: text.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<String> {
        [
            "RegionName",
            "City",
            "State",
            "2024-12-31",
            "2025-01-31",
            "Growth_2021",
            "Growth_2022",
            "Growth_2023",
            "Growth_2024",
            "Growth_2025",
            "Vacancy_Rate_2023",
            "Affordability_Ratio_2023",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample_table() -> RawTable {
        RawTable::new(
            headers(),
            vec![
                row(&["6010.0", "Bristol", "CT", "300000", "310000.4", "0.01", "0.02", "0.03", "0.04", "0.05", "0.06", "4.5"]),
                row(&["77002", "Houston", "TX", "250000", "", "0.02", "NaN", "0.01", "0.03", "0.02", "", "3.1"]),
            ],
        )
    }

    #[test]
    fn test_parse_batch() {
        let batch = RegionBatch::from_table(&sample_table(), &ColumnMapping::default(), None).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.reference_year, 2025);
        assert_eq!(batch.price_column, "2025-01-31");

        let first = &batch.records[0];
        assert_eq!(first.region_id.as_str(), "06010");
        assert_eq!(first.current_price, Some(310000.4));
        assert_eq!(first.growth(2025), Some(0.05));

        let second = &batch.records[1];
        assert_eq!(second.current_price, None);
        assert_eq!(second.growth(2022), None);
        assert_eq!(second.vacancy_rate, None);
        assert_eq!(second.affordability_ratio, Some(3.1));
    }

    #[test]
    fn test_missing_growth_year_is_reported() {
        let mut table = sample_table();
        let idx = table.column_index("Growth_2022").unwrap();
        table.headers[idx] = "Growth2022".to_string();

        let err = RegionBatch::from_table(&table, &ColumnMapping::default(), None).unwrap_err();
        match err {
            ScoringError::MissingColumn { column, rows } => {
                assert_eq!(column, "Growth_2022");
                assert_eq!(rows, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_vacancy_column_is_fatal() {
        let mut table = sample_table();
        let idx = table.column_index("Vacancy_Rate_2023").unwrap();
        table.headers[idx] = "Vacancy".to_string();

        let err = RegionBatch::from_table(&table, &ColumnMapping::default(), None).unwrap_err();
        assert!(matches!(err, ScoringError::MissingColumn { ref column, .. } if column == "Vacancy_Rate_2023"));
    }

    #[test]
    fn test_price_fallback_requires_explicit_mapping() {
        let mut table = sample_table();
        table.headers[3] = "PriceDec".to_string();
        table.headers[4] = "PriceJan".to_string();

        let err = RegionBatch::from_table(&table, &ColumnMapping::default(), None).unwrap_err();
        assert!(matches!(err, ScoringError::MissingColumn { .. }));

        let columns = ColumnMapping {
            price_fallback_columns: vec!["Missing".to_string(), "PriceJan".to_string()],
            ..ColumnMapping::default()
        };
        let batch = RegionBatch::from_table(&table, &columns, None).unwrap();
        assert_eq!(batch.price_column, "PriceJan");
        assert_eq!(batch.records[0].current_price, Some(310000.4));
    }

    #[test]
    fn test_invalid_number_names_cell() {
        let mut table = sample_table();
        table.rows[1][10] = "high".to_string();

        let err = RegionBatch::from_table(&table, &ColumnMapping::default(), None).unwrap_err();
        match err {
            ScoringError::InvalidValue { column, row, value } => {
                assert_eq!(column, "Vacancy_Rate_2023");
                assert_eq!(row, 2);
                assert_eq!(value, "high");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_reference_year_needs_window() {
        let err = RegionBatch::from_table(&sample_table(), &ColumnMapping::default(), Some(2023)).unwrap_err();
        assert!(matches!(err, ScoringError::MissingColumn { ref column, .. } if column == "Growth_2020"));

        let batch = RegionBatch::from_table(&sample_table(), &ColumnMapping::default(), Some(2024)).unwrap();
        assert_eq!(batch.reference_year, 2024);
    }
}
