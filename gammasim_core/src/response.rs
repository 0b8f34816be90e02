//! Instrument response tables.
//!
//! Each of the three response files (PSD, SAR, EDP) is a JSON band table:
//!
//! ```text
//! { "bands": [ { "emin": 100, "emax": 400, "value": 3.5 }, ... ] }
//! ```
//!
//! - PSD: Gaussian PSF sigma in degrees
//! - SAR: effective-area scale applied to the exposure
//! - EDP: fraction of photons reconstructed inside their true band

use gammasim_env::{EnergyBand, ResponsePaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or querying response tables.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("Cannot read response file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed response file {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("No {table} entry for band {band}")]
    NoBand { table: &'static str, band: EnergyBand },
}

/// One band of a response table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandValue {
    pub emin: f64,
    pub emax: f64,
    pub value: f64,
}

/// A response quantity tabulated by energy band.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BandTable {
    pub bands: Vec<BandValue>,
}

impl BandTable {
    pub fn new(bands: Vec<BandValue>) -> Self {
        Self { bands }
    }

    /// Table with a single value covering every energy.
    pub fn constant(value: f64) -> Self {
        Self::new(vec![BandValue {
            emin: 0.0,
            emax: f64::MAX,
            value,
        }])
    }

    /// Value for a map band.
    ///
    /// Picks the table band containing the map band's centre, or the band
    /// whose centre is nearest in log-energy.
    pub fn lookup(&self, band: &EnergyBand) -> Option<f64> {
        let center = band.center();
        if let Some(hit) = self.bands.iter().find(|b| center >= b.emin && center <= b.emax) {
            return Some(hit.value);
        }
        self.bands
            .iter()
            .min_by(|a, b| {
                let da = ((a.emin * a.emax).sqrt().ln() - center.ln()).abs();
                let db = ((b.emin * b.emax).sqrt().ln() - center.ln()).abs();
                da.total_cmp(&db)
            })
            .map(|b| b.value)
    }

    fn load(path: &Path, strictly_positive: bool) -> Result<Self, ResponseError> {
        let text = fs::read_to_string(path).map_err(|source| ResponseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let malformed = |reason: String| ResponseError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let table: BandTable = serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?;

        if table.bands.is_empty() {
            return Err(malformed("no bands".to_string()));
        }
        for band in &table.bands {
            if band.emin >= band.emax {
                return Err(malformed(format!("empty band {}-{}", band.emin, band.emax)));
            }
            let valid = if strictly_positive {
                band.value > 0.0
            } else {
                band.value >= 0.0
            };
            if !valid || !band.value.is_finite() {
                return Err(malformed(format!("invalid value {}", band.value)));
            }
        }
        Ok(table)
    }
}

/// PSF, effective-area and dispersion tables of the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTables {
    pub psf: BandTable,
    pub effective_area: BandTable,
    pub dispersion: BandTable,
}

impl ResponseTables {
    /// Loads the three response files.
    pub fn load(paths: &ResponsePaths) -> Result<Self, ResponseError> {
        Ok(Self {
            psf: BandTable::load(&paths.psd, true)?,
            effective_area: BandTable::load(&paths.sar, false)?,
            dispersion: BandTable::load(&paths.edp, false)?,
        })
    }

    /// Ideal response: fixed PSF width, unit area and full containment.
    pub fn ideal(psf_sigma_deg: f64) -> Self {
        Self {
            psf: BandTable::constant(psf_sigma_deg),
            effective_area: BandTable::constant(1.0),
            dispersion: BandTable::constant(1.0),
        }
    }

    /// PSF Gaussian sigma for a band (degrees).
    pub fn psf_sigma_deg(&self, band: &EnergyBand) -> Result<f64, ResponseError> {
        self.psf.lookup(band).ok_or(ResponseError::NoBand { table: "PSD", band: *band })
    }

    /// Combined effective-area and dispersion scale for a band.
    pub fn exposure_scale(&self, band: &EnergyBand) -> Result<f64, ResponseError> {
        let area = self
            .effective_area
            .lookup(band)
            .ok_or(ResponseError::NoBand { table: "SAR", band: *band })?;
        let dispersion = self
            .dispersion
            .lookup(band)
            .ok_or(ResponseError::NoBand { table: "EDP", band: *band })?;
        Ok(area * dispersion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BandTable {
        BandTable::new(vec![
            BandValue { emin: 100.0, emax: 400.0, value: 3.0 },
            BandValue { emin: 400.0, emax: 1000.0, value: 1.5 },
        ])
    }

    #[test]
    fn test_lookup_containing_band() {
        assert_eq!(table().lookup(&EnergyBand::new(100.0, 400.0)), Some(3.0));
        assert_eq!(table().lookup(&EnergyBand::new(500.0, 800.0)), Some(1.5));
    }

    #[test]
    fn test_lookup_nearest_band() {
        assert_eq!(table().lookup(&EnergyBand::new(5000.0, 50000.0)), Some(1.5));
        assert_eq!(table().lookup(&EnergyBand::new(30.0, 50.0)), Some(3.0));
        assert_eq!(BandTable::default().lookup(&EnergyBand::new(30.0, 50.0)), None);
    }

    #[test]
    fn test_load_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let zero_psf = dir.path().join("zero.json");
        fs::write(&good, r#"{"bands":[{"emin":100,"emax":10000,"value":2.0}]}"#).unwrap();
        fs::write(&zero_psf, r#"{"bands":[{"emin":100,"emax":10000,"value":0.0}]}"#).unwrap();

        let ok = ResponsePaths { psd: good.clone(), sar: good.clone(), edp: zero_psf.clone() };
        assert!(ResponseTables::load(&ok).is_ok());

        let bad = ResponsePaths { psd: zero_psf.clone(), sar: good.clone(), edp: good.clone() };
        assert!(matches!(ResponseTables::load(&bad), Err(ResponseError::Malformed { .. })));

        let missing = ResponsePaths { psd: dir.path().join("none.json"), sar: good.clone(), edp: good };
        assert!(matches!(ResponseTables::load(&missing), Err(ResponseError::Io { .. })));
    }

    #[test]
    fn test_exposure_scale_combines_tables() {
        let tables = ResponseTables {
            psf: BandTable::constant(2.0),
            effective_area: BandTable::constant(0.8),
            dispersion: BandTable::constant(0.5),
        };
        let band = EnergyBand::new(100.0, 10000.0);
        assert_eq!(tables.exposure_scale(&band).unwrap(), 0.4);
        assert_eq!(tables.psf_sigma_deg(&band).unwrap(), 2.0);
    }
}
