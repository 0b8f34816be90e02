//! gammasim Collaborator Abstraction Layer
//!
//! This crate defines the narrow interfaces through which the campaign
//! driver talks to everything it does not own:
//! - The multi-source **fit engine** (`FitEngine`)
//! - Map persistence (`MapStore`)
//! - The precomputed diffuse-emission maps (`DiffuseStore`)
//!
//! It also holds the data types shared across those interfaces, so that
//! the core library and the simulation harness agree on what a sky map or
//! a source descriptor is.
//!
//! # Implementations
//!
//! - **Production**: `FsMapStore` / `FsDiffuseStore` (JSON files on disk)
//! - **Simulation/tests**: in-memory stores in `gammasim_sim`
//!
//! # Example
//!
//! ```ignore
//! use gammasim_env::{DiffuseStore, EnergyBand, FsDiffuseStore, FsMapStore};
//!
//! let store = FsDiffuseStore::new("/data/responses", FsMapStore::new("."));
//! let gas = store.diffuse_map(&EnergyBand::new(100.0, 10000.0), "I0025")?;
//! ```

mod engine;
mod store;
mod types;
mod error;
mod fs_impl;

pub use engine::FitEngine;
pub use store::{DiffuseStore, MapStore};
pub use types::{
    AnalysisMap, CoefficientMode, EmissionModes, EnergyBand, FitParams, FitResult, FixFlag, MapGeometry,
    ResponsePaths, SkyMap, SourceDescriptor, TimeRange, longitude_offset, normalize_longitude,
};
pub use error::{EngineError, StoreError};
pub use fs_impl::{diffuse_file_name, FsDiffuseStore, FsMapStore};
