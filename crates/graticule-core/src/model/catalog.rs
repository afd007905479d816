//! The coordinate catalog: curated hotspot records loaded from a JSON file.
//!
//! The catalog supplies extra sampling density at population centers and
//! named places. Each record is deserialized and validated individually;
//! a malformed record is rejected (logged and counted) without aborting the
//! rest of the load, and is never silently zeroed out.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// One coordinate-catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub label: String,
    pub lat: f64,
    pub lon: f64,

    /// Relative sampling weight; defaults to 1.0 when absent.
    #[serde(default)]
    pub weight: Option<f64>,

    /// Optional scene hint (`urban`, `rural`, `nature`) carried through to
    /// calibration explanations.
    #[serde(default)]
    pub category: Option<String>,
}

impl CatalogEntry {
    /// Validate coordinate ranges and id presence.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_record("<unnamed>", "empty id"));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::invalid_record(
                &self.id,
                format!("latitude {} out of range", self.lat),
            ));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(Error::invalid_record(
                &self.id,
                format!("longitude {} out of range", self.lon),
            ));
        }
        if let Some(w) = self.weight {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::invalid_record(
                    &self.id,
                    format!("weight {w} invalid"),
                ));
            }
        }
        Ok(())
    }
}

/// Result of a catalog load: the accepted entries plus a count of rejected
/// records for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CatalogLoad {
    pub entries: Vec<CatalogEntry>,
    pub rejected: usize,
}

/// Load and validate a catalog file.
///
/// The file must contain a JSON array. Entries that fail typed
/// deserialization or validation are rejected individually.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a JSON array at
/// the top level.
pub fn load_catalog(path: &Path) -> Result<CatalogLoad> {
    let raw = std::fs::read_to_string(path)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

    let mut load = CatalogLoad::default();
    for (index, value) in values.into_iter().enumerate() {
        let entry = match serde_json::from_value::<CatalogEntry>(value) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("catalog record {index} rejected: {e}");
                load.rejected += 1;
                continue;
            }
        };
        if let Err(e) = entry.validate() {
            log::warn!("catalog record {index} rejected: {e}");
            load.rejected += 1;
            continue;
        }
        load.entries.push(entry);
    }

    log::info!(
        "catalog {}: {} entries loaded, {} rejected",
        path.display(),
        load.entries.len(),
        load.rejected
    );
    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_entry_validate() {
        let entry = CatalogEntry {
            id: "city-paris".to_string(),
            label: "Paris".to_string(),
            lat: 48.8566,
            lon: 2.3522,
            weight: Some(4.0),
            category: Some("urban".to_string()),
        };
        assert!(entry.validate().is_ok());

        let bad = CatalogEntry {
            lat: 100.0,
            ..entry
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_load_catalog_rejects_bad_records_individually() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "a", "label": "A", "lat": 10.0, "lon": 20.0},
                {"id": "b", "label": "B", "lat": 999.0, "lon": 0.0},
                {"label": "missing id", "lat": 0.0, "lon": 0.0},
                {"id": "c", "label": "C", "lat": -45.0, "lon": 170.0, "weight": 2.5}
            ]"#,
        )
        .expect("write");

        let load = load_catalog(&path).expect("load");
        assert_eq!(load.entries.len(), 2);
        assert_eq!(load.rejected, 2);
        assert_eq!(load.entries[0].id, "a");
        assert_eq!(load.entries[1].id, "c");
    }

    #[test]
    fn test_load_catalog_requires_array() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"not": "an array"}"#).expect("write");
        assert!(load_catalog(&path).is_err());
    }

    #[test]
    fn test_load_catalog_missing_file_is_io_error() {
        let result = load_catalog(Path::new("/nonexistent/catalog.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
