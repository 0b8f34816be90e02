//! In-memory map stores for simulation and tests.

use gammasim_env::{diffuse_file_name, DiffuseStore, EnergyBand, MapStore, SkyMap, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Map store holding maps in memory, keyed by path.
///
/// Writes can be made to fail for paths containing a given fragment, to
/// exercise write-failure handling without a full disk.
#[derive(Debug, Default)]
pub struct MemoryMapStore {
    maps: Mutex<BTreeMap<PathBuf, SkyMap>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a map without going through the failure filter.
    pub fn insert(&self, path: impl Into<PathBuf>, map: SkyMap) {
        self.maps.lock().unwrap().insert(path.into(), map);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<SkyMap> {
        self.maps.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.maps.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every later write to a path containing `fragment` fail.
    pub fn fail_writes_matching(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    fn should_fail(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.failing.lock().unwrap().iter().any(|f| text.contains(f.as_str()))
    }
}

impl MapStore for MemoryMapStore {
    fn read_map(&self, path: &Path) -> Result<SkyMap, StoreError> {
        self.get(path).ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    fn write_map(&self, path: &Path, map: &SkyMap) -> Result<(), StoreError> {
        if self.should_fail(path) {
            return Err(StoreError::io(
                path,
                io::Error::new(io::ErrorKind::Other, "no space left on device"),
            ));
        }
        self.insert(path, map.clone());
        Ok(())
    }
}

/// Diffuse store holding one map per (band, matrix set).
#[derive(Debug, Default, Clone)]
pub struct MemoryDiffuseStore {
    maps: HashMap<String, SkyMap>,
}

impl MemoryDiffuseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, band: EnergyBand, matrices: &str, map: SkyMap) {
        self.maps.insert(diffuse_file_name(&band, matrices), map);
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl DiffuseStore for MemoryDiffuseStore {
    fn diffuse_map(&self, band: &EnergyBand, matrices: &str) -> Result<SkyMap, StoreError> {
        let key = diffuse_file_name(band, matrices);
        self.maps
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gammasim_env::{MapGeometry, TimeRange};

    fn map() -> SkyMap {
        SkyMap::filled(
            MapGeometry::new(0.0, 0.0, 1.0, 2, 2),
            EnergyBand::new(100.0, 400.0),
            TimeRange::new(0.0, 1.0),
            1.0,
        )
    }

    #[test]
    fn test_memory_map_store_roundtrip() {
        let store = MemoryMapStore::new();
        store.write_map(Path::new("out/a.cts"), &map()).unwrap();
        assert_eq!(store.read_map(Path::new("out/a.cts")).unwrap(), map());
        assert!(matches!(
            store.read_map(Path::new("out/b.cts")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_injected_write_failure() {
        let store = MemoryMapStore::new();
        store.fail_writes_matching("SUM");
        let err = store.write_map(Path::new("x_SUM001_out.cts"), &map()).unwrap_err();
        assert_eq!(err.status(), 74);
        assert!(store.write_map(Path::new("x_BLOCK000_out.cts"), &map()).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_diffuse_store_keyed_by_band() {
        let mut store = MemoryDiffuseStore::new();
        store.insert(EnergyBand::new(100.0, 400.0), "I0025", map());
        assert!(store.diffuse_map(&EnergyBand::new(100.0, 400.0), "I0025").is_ok());
        assert!(store.diffuse_map(&EnergyBand::new(100.0, 400.0), "H0025").is_err());
        assert!(store.diffuse_map(&EnergyBand::new(400.0, 1000.0), "I0025").is_err());
    }
}
