//! gammasim Core - catalogs, response and likelihood fitting for gamma-ray count maps
//!
//! This library provides the pieces the campaign driver builds on:
//! 1. **Catalogs**: ordered map lists and source lists, read and written in
//!    the whitespace-separated text formats of the analysis tools
//! 2. **Response**: PSF / effective-area / dispersion band tables
//! 3. **Likelihood**: a Poisson maximum-likelihood multi-source fit engine
//!    implementing `gammasim_env::FitEngine`
//! 4. **Source grids**: candidate source lists tiled over a map region

pub mod catalog;
pub mod response;
pub mod sky;
pub mod stats;
pub mod likelihood;
pub mod source_grid;

// Re-export key types for convenience
pub use catalog::{CatalogError, MapCatalog, MapEntry, SourceCatalog};
pub use response::{BandTable, ResponseError, ResponseTables};
pub use likelihood::LikelihoodFitEngine;
pub use source_grid::{grid_sources, GridParams};
