//! Simulation engine - draws synthetic count maps.
//!
//! Each run produces one Poisson count map per simulation map entry, in
//! catalog order. The expected counts of a pixel are the PSF-spread flux
//! of every catalog source times the pixel exposure, plus the modeled
//! background when the entry carries emission coefficients.

use gammasim_core::catalog::MapEntry;
use gammasim_core::response::{ResponseError, ResponseTables};
use gammasim_core::sky::{background_counts, band_fraction, psf_template};
use gammasim_env::{SkyMap, SourceDescriptor};
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use thiserror::Error;

/// One synthetic count map per simulation map entry, in catalog order.
pub type SimulatedMapArray = Vec<SkyMap>;

/// Errors building the expected-count model.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid expected count {rate} in map {map} at pixel ({row}, {col})")]
    InvalidRate {
        map: usize,
        row: usize,
        col: usize,
        rate: f64,
    },

    #[error("Response lookup failed: {0}")]
    Response(#[from] ResponseError),
}

/// Inputs of one simulated map.
#[derive(Debug, Clone)]
struct SimulationMap {
    entry: MapEntry,
    exposure: SkyMap,
    diffuse: Option<SkyMap>,
}

/// Generates the simulated map array of a run.
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    maps: Vec<SimulationMap>,
    exposures: Vec<SkyMap>,
    response: ResponseTables,
    simulate_background: bool,
}

impl SimulationEngine {
    /// Creates an engine with no maps.
    pub fn new(response: ResponseTables) -> Self {
        Self {
            maps: Vec::new(),
            exposures: Vec::new(),
            response,
            simulate_background: true,
        }
    }

    /// Enables or disables the background term.
    pub fn with_background(mut self, enabled: bool) -> Self {
        self.simulate_background = enabled;
        self
    }

    /// Appends a map entry with its exposure and, if any, its diffuse map
    /// already aligned to the exposure grid.
    pub fn add_map(&mut self, entry: MapEntry, exposure: SkyMap, diffuse: Option<SkyMap>) {
        self.exposures.push(exposure.clone());
        self.maps.push(SimulationMap {
            entry,
            exposure,
            diffuse,
        });
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Exposure maps, in catalog order.
    pub fn exposures(&self) -> &[SkyMap] {
        &self.exposures
    }

    pub fn entry(&self, index: usize) -> Option<&MapEntry> {
        self.maps.get(index).map(|m| &m.entry)
    }

    /// Expected counts of map `index` for a source catalog.
    pub fn expected_counts(&self, index: usize, sources: &[SourceDescriptor]) -> Result<DMatrix<f64>, SimulationError> {
        let map = &self.maps[index];
        let exposure = &map.exposure;
        let geometry = &exposure.geometry;

        let mut mu = if self.simulate_background && map.entry.has_background() {
            background_counts(
                exposure,
                map.diffuse.as_ref(),
                map.entry.gal_coeff.unwrap_or(0.0),
                map.entry.iso_coeff.unwrap_or(0.0),
            )
        } else {
            DMatrix::zeros(geometry.rows, geometry.cols)
        };

        if sources.is_empty() {
            return Ok(mu);
        }

        let sigma = self.response.psf_sigma_deg(&exposure.band)?;
        let scale = self.response.exposure_scale(&exposure.band)?;
        for source in sources {
            let flux = source.flux * band_fraction(source.index, &exposure.band) * scale;
            if flux == 0.0 {
                continue;
            }
            let template = psf_template(geometry, source.l, source.b, sigma);
            mu += template.component_mul(&exposure.data) * flux;
        }
        Ok(mu)
    }

    /// Draws a fresh simulated map array from `sources`.
    ///
    /// Maps are drawn in catalog order, pixels row by row, so the stream
    /// position after a call depends only on the catalog and the model.
    pub fn new_simulation_array<R: Rng + ?Sized>(
        &self,
        sources: &[SourceDescriptor],
        rng: &mut R,
    ) -> Result<SimulatedMapArray, SimulationError> {
        let mut simulated = Vec::with_capacity(self.maps.len());
        for index in 0..self.maps.len() {
            simulated.push(self.simulate_map(index, sources, rng)?);
        }
        Ok(simulated)
    }

    fn simulate_map<R: Rng + ?Sized>(
        &self,
        index: usize,
        sources: &[SourceDescriptor],
        rng: &mut R,
    ) -> Result<SkyMap, SimulationError> {
        let mu = self.expected_counts(index, sources)?;
        let exposure = &self.maps[index].exposure;
        let mut counts = SkyMap::zeros(exposure.geometry, exposure.band, exposure.time);

        for row in 0..mu.nrows() {
            for col in 0..mu.ncols() {
                let rate = mu[(row, col)];
                counts.data[(row, col)] = sample_poisson(rate, rng).ok_or(SimulationError::InvalidRate {
                    map: index,
                    row,
                    col,
                    rate,
                })?;
            }
        }
        Ok(counts)
    }
}

/// One Poisson draw; `None` for a negative or non-finite rate.
fn sample_poisson<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> Option<f64> {
    if rate == 0.0 {
        return Some(0.0);
    }
    if !rate.is_finite() || rate < 0.0 {
        return None;
    }
    Poisson::new(rate).ok().map(|poisson| poisson.sample(rng))
}
