//! Offline postal-code geocoding for result tables

use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Result, ScoringError};
use crate::types::{RawTable, RegionId};

pub const LATITUDE_COLUMN: &str = "Latitude";
pub const LONGITUDE_COLUMN: &str = "Longitude";

#[derive(Debug, Deserialize)]
struct GazetteerEntry {
    postal_code: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Postal code → (latitude, longitude) from a local gazetteer file
#[derive(Debug, Clone, Default)]
pub struct GeoLookup {
    coordinates: HashMap<RegionId, (f64, f64)>,
}

impl GeoLookup {
    /// Gazetteer CSV with `postal_code,latitude,longitude` columns
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let lookup = Self::from_reader(File::open(&path)?)?;
        info!(
            "Loaded {} postal codes from {}",
            lookup.len(),
            path.as_ref().display()
        );
        Ok(lookup)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut coordinates = HashMap::new();

        for result in reader.deserialize() {
            let entry: GazetteerEntry = result?;
            let (Some(id), Some(lat), Some(lon)) = (RegionId::parse(&entry.postal_code), entry.latitude, entry.longitude)
            else {
                continue;
            };
            coordinates.insert(id, (lat, lon));
        }

        Ok(Self { coordinates })
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn get(&self, region: &RegionId) -> Option<(f64, f64)> {
        self.coordinates.get(region).copied()
    }

    /// Copy of `table` with Latitude/Longitude appended (empty when unresolved).
    /// Region ids are normalized the same way as the scoring input.
    pub fn enrich(&self, table: &RawTable, region_column: &str) -> Result<RawTable> {
        let region_idx = table.column_index(region_column).ok_or_else(|| ScoringError::MissingColumn {
            column: region_column.to_string(),
            rows: table.len(),
        })?;

        let ids: Vec<Option<RegionId>> = (0..table.len())
            .map(|row| RegionId::parse(table.cell(row, region_idx)))
            .collect();

        let unique: BTreeSet<&RegionId> = ids.iter().flatten().collect();
        let resolved: HashMap<&RegionId, (f64, f64)> = unique
            .iter()
            .filter_map(|&id| self.get(id).map(|c| (id, c)))
            .collect();

        let unresolved = unique.len() - resolved.len();
        if unresolved > 0 {
            warn!("{} of {} postal codes have no coordinates", unresolved, unique.len());
        }
        info!("Geocoded {} unique postal codes", resolved.len());

        let mut headers = table.headers.clone();
        headers.push(LATITUDE_COLUMN.to_string());
        headers.push(LONGITUDE_COLUMN.to_string());

        let rows = table
            .rows
            .iter()
            .zip(&ids)
            .map(|(row, id)| {
                let mut row = row.clone();
                row.resize(table.headers.len(), String::new());
                row[region_idx] = id.as_ref().map(|id| id.to_string()).unwrap_or_default();
                match id.as_ref().and_then(|id| resolved.get(id)) {
                    Some((lat, lon)) => {
                        row.push(lat.to_string());
                        row.push(lon.to_string());
                    }
                    None => {
                        row.push(String::new());
                        row.push(String::new());
                    }
                }
                row
            })
            .collect();

        Ok(RawTable::new(headers, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAZETTEER: &str = "postal_code,latitude,longitude\n\
        06010,41.6823,-72.9407\n\
        77002, 29.7569 ,-95.3625\n\
        99999,,\n";

    fn results() -> RawTable {
        RawTable::new(
            vec!["RegionName".to_string(), "City".to_string()],
            vec![
                vec!["6010.0".to_string(), "Bristol".to_string()],
                vec!["77002".to_string(), "Houston".to_string()],
                vec!["99999".to_string(), "Nowhere".to_string()],
                vec!["6010".to_string(), "Bristol".to_string()],
            ],
        )
    }

    #[test]
    fn test_load_gazetteer() {
        let lookup = GeoLookup::from_reader(GAZETTEER.as_bytes()).unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get(&RegionId::parse("6010").unwrap()), Some((41.6823, -72.9407)));
    }

    #[test]
    fn test_enrich_appends_coordinates() {
        let lookup = GeoLookup::from_reader(GAZETTEER.as_bytes()).unwrap();
        let enriched = lookup.enrich(&results(), "RegionName").unwrap();

        assert_eq!(enriched.headers, vec!["RegionName", "City", "Latitude", "Longitude"]);
        assert_eq!(enriched.rows[0], vec!["06010", "Bristol", "41.6823", "-72.9407"]);
        assert_eq!(enriched.rows[1][2], "29.7569");
        assert_eq!(enriched.rows[2][2], "");
        assert_eq!(enriched.rows[2][3], "");
        assert_eq!(enriched.rows[3][0], "06010");
    }

    #[test]
    fn test_enrich_requires_region_column() {
        let lookup = GeoLookup::default();
        let err = lookup.enrich(&results(), "Zip").unwrap_err();
        assert!(matches!(err, ScoringError::MissingColumn { ref column, rows: 4 } if column == "Zip"));
    }
}
