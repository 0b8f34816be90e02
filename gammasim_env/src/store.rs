//! Map persistence abstractions.

use crate::error::StoreError;
use crate::types::{EnergyBand, SkyMap};
use std::path::Path;

/// Reads and writes sky maps.
///
/// # Implementations
///
/// - **Production**: `FsMapStore` - JSON files relative to a root directory
/// - **Tests**: `MemoryMapStore` in `gammasim_sim`
pub trait MapStore {
    /// Loads a map.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - no map under `path`
    /// * `StoreError::Malformed` - the file is not a valid map
    fn read_map(&self, path: &Path) -> Result<SkyMap, StoreError>;

    /// Saves a map, replacing any previous content.
    fn write_map(&self, path: &Path, map: &SkyMap) -> Result<(), StoreError>;
}

/// Source of precomputed diffuse-emission (gas) maps.
///
/// Maps are keyed by energy band and response-matrix identifier.
pub trait DiffuseStore {
    /// Returns the diffuse map for a band.
    ///
    /// # Errors
    /// * `StoreError::NotFound` - no map for this band and matrix set
    /// * `StoreError::Malformed` / `StoreError::Io` - unreadable map
    fn diffuse_map(&self, band: &EnergyBand, matrices: &str) -> Result<SkyMap, StoreError>;
}
