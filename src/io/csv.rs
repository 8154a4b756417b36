//! Delimited file loading and result writing

use csv::{ReaderBuilder, Writer};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::ml::ResultTable;
use crate::types::RawTable;

/// Load a headed CSV file; short rows are kept and read as missing cells
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    let file = File::open(&path)?;
    let table = read_table_from(file)?;
    info!(
        "Loaded {} rows x {} columns from {}",
        table.len(),
        table.headers.len(),
        path.as_ref().display()
    );
    Ok(table)
}

pub fn read_table_from<R: Read>(reader: R) -> Result<RawTable> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable::new(headers, rows))
}

pub fn write_table<P: AsRef<Path>>(path: P, table: &RawTable) -> Result<()> {
    let file = File::create(&path)?;
    write_table_to(file, table)
}

pub fn write_table_to<W: Write>(writer: W, table: &RawTable) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write ranked results with the dynamic `Growth_<year>_Pct` header
pub fn write_results<P: AsRef<Path>>(path: P, results: &ResultTable) -> Result<()> {
    write_table(&path, &to_raw_table(results))?;
    info!("Wrote {} ranked regions to {}", results.len(), path.as_ref().display());
    Ok(())
}

pub fn to_raw_table(results: &ResultTable) -> RawTable {
    RawTable::new(results.headers(), results.records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::RankedResult;
    use crate::types::{InvestmentLabel, RegionId};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[test]
    fn test_read_flexible_rows() {
        let data = "\u{feff}RegionName,City,Growth_2025\n6010,Bristol,0.05\n77002,Houston\n";
        let table = read_table_from(data.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["RegionName", "City", "Growth_2025"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 2), "0.05");
        assert_eq!(table.cell(1, 2), "");
    }

    #[test]
    fn test_write_and_read_results() {
        let results = ResultTable {
            reference_year: 2025,
            rows: vec![RankedResult {
                region_id: RegionId::parse("6010").unwrap(),
                city: "Bristol, Town of".to_string(),
                state: "CT".to_string(),
                current_price: Some(dec!(310000)),
                classification: InvestmentLabel::HighPotential,
                confidence_pct: dec!(87.5),
                growth_pct: dec!(5.0),
                affordability: dec!(4.5),
                vacancy_pct: dec!(6.0),
                momentum_pct: dec!(2.0),
            }],
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("ranked.csv");
        write_results(&path, &results).unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.headers[6], "Growth_2025_Pct");
        assert_eq!(table.cell(0, 0), "06010");
        assert_eq!(table.cell(0, 1), "Bristol, Town of");
        assert_eq!(table.cell(0, 3), "310000");
        assert_eq!(table.cell(0, 4), "HighPotential");
        assert_eq!(table.cell(0, 5), "87.5");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_table("/nonexistent/input.csv").unwrap_err();
        assert!(matches!(err, crate::error::ScoringError::Io(_)));
    }
}
