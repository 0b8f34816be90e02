//! Production implementations of the map stores, backed by the filesystem.

use crate::error::StoreError;
use crate::store::{DiffuseStore, MapStore};
use crate::types::{EnergyBand, SkyMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Map store that keeps each map as a JSON document on disk.
///
/// Relative paths resolve against `root`; absolute paths are used as-is.
#[derive(Debug, Clone)]
pub struct FsMapStore {
    root: PathBuf,
}

impl FsMapStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Default for FsMapStore {
    fn default() -> Self {
        Self::new(".")
    }
}

impl MapStore for FsMapStore {
    fn read_map(&self, path: &Path) -> Result<SkyMap, StoreError> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(StoreError::NotFound(full));
        }
        let text = fs::read_to_string(&full).map_err(|e| StoreError::io(&full, e))?;
        let map: SkyMap = serde_json::from_str(&text).map_err(|e| StoreError::Malformed {
            path: full.clone(),
            reason: e.to_string(),
        })?;

        // Header and pixel block must agree
        if map.data.shape() != (map.geometry.rows, map.geometry.cols) {
            return Err(StoreError::Malformed {
                path: full,
                reason: format!(
                    "pixel block is {:?}, header says {}x{}",
                    map.data.shape(),
                    map.geometry.rows,
                    map.geometry.cols
                ),
            });
        }
        Ok(map)
    }

    fn write_map(&self, path: &Path, map: &SkyMap) -> Result<(), StoreError> {
        let full = self.resolve(path);
        let json = serde_json::to_string(map).map_err(|e| StoreError::Malformed {
            path: full.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&full, json).map_err(|e| StoreError::io(&full, e))
    }
}

/// Name of the diffuse map file for a band and matrix set,
/// e.g. `100_10000.I0025.disp.conv.sky`.
pub fn diffuse_file_name(band: &EnergyBand, matrices: &str) -> String {
    format!("{}.{}.disp.conv.sky", band, matrices)
}

/// Diffuse store reading `<dir>/<emin>_<emax>.<matrices>.disp.conv.sky`.
#[derive(Debug, Clone)]
pub struct FsDiffuseStore {
    dir: PathBuf,
    maps: FsMapStore,
}

impl FsDiffuseStore {
    /// Creates a store looking up maps in `dir`.
    pub fn new(dir: impl Into<PathBuf>, maps: FsMapStore) -> Self {
        Self {
            dir: dir.into(),
            maps,
        }
    }

    /// Returns the path the store would read for a band.
    pub fn path_for(&self, band: &EnergyBand, matrices: &str) -> PathBuf {
        self.dir.join(diffuse_file_name(band, matrices))
    }
}

impl DiffuseStore for FsDiffuseStore {
    fn diffuse_map(&self, band: &EnergyBand, matrices: &str) -> Result<SkyMap, StoreError> {
        self.maps.read_map(&self.path_for(band, matrices))
    }
}
