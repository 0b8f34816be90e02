//! Likelihood Fit Engine
//! =====================
//!
//! Reference implementation of `FitEngine`: a Poisson maximum-likelihood
//! fit of point sources over a diffuse + isotropic background.
//!
//! Sources are fitted one after another in catalog order. Each fitted
//! source is added to the background model seen by the sources after it,
//! and `AllFixed` sources enter the model with their catalog flux before
//! any fitting starts.
//!
//! # Per-source fit
//! ```text
//! μ_i(F) = b_i + F · s_i               (pixels within the analysis radius)
//! L(F)   = Σ n_i ln μ_i − μ_i
//! TS     = 2 (L(F̂) − L(0)),  F̂ ≥ 0
//! ```
//! `s_i` is the expected counts of a unit-flux source: exposure × response
//! scale × in-band spectral fraction × PSF pixel weight.

use crate::catalog::{CatalogError, SourceCatalog};
use crate::response::{ResponseError, ResponseTables};
use crate::sky::{angular_distance_deg, background_counts, band_fraction, psf_template, psf_weight};
use crate::stats::{location_threshold, poisson_term, upper_limit_threshold, MODEL_FLOOR};
use gammasim_env::{
    AnalysisMap, CoefficientMode, EmissionModes, EngineError, EnergyBand, FitEngine, FitParams,
    FitResult, FixFlag, ResponsePaths, SkyMap, SourceDescriptor, normalize_longitude,
};
use nalgebra::DMatrix;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Status reported for internal fit failures.
pub const FIT_FAILURE_STATUS: i32 = 70;

const MAX_BRACKET_STEPS: usize = 200;
const BISECTION_STEPS: usize = 100;
const MAX_POSITION_STEPS: usize = 64;

impl From<ResponseError> for EngineError {
    fn from(err: ResponseError) -> Self {
        EngineError::response(err.to_string())
    }
}

impl From<CatalogError> for EngineError {
    fn from(err: CatalogError) -> Self {
        EngineError::Io(err.to_string())
    }
}

// =============================================================================
// FIT REGION
// =============================================================================

/// One pixel taking part in a source fit.
#[derive(Debug, Clone, Copy)]
struct Pixel {
    /// Observed counts
    n: f64,
    /// Model counts without this source
    base: f64,
    /// Expected counts of a unit-flux source
    s: f64,
}

/// Pixels within the analysis radius of a source, across all maps.
#[derive(Debug, Default)]
struct Region {
    pixels: Vec<Pixel>,
}

impl Region {
    fn source_weight(&self) -> f64 {
        self.pixels.iter().map(|p| p.s).sum()
    }

    fn counts(&self) -> f64 {
        self.pixels.iter().map(|p| p.n).sum()
    }

    fn log_likelihood(&self, flux: f64) -> f64 {
        self.pixels
            .iter()
            .map(|p| poisson_term(p.n, p.base + flux * p.s))
            .sum()
    }

    /// dL/dF, monotone decreasing in F.
    fn score(&self, flux: f64) -> f64 {
        self.pixels
            .iter()
            .map(|p| p.s * (p.n / (p.base + flux * p.s).max(MODEL_FLOOR) - 1.0))
            .sum()
    }

    /// Observed Fisher information at F.
    fn information(&self, flux: f64) -> f64 {
        self.pixels
            .iter()
            .map(|p| {
                let mu = (p.base + flux * p.s).max(MODEL_FLOOR);
                p.n * p.s * p.s / (mu * mu)
            })
            .sum()
    }

    /// Maximum-likelihood flux, constrained to F ≥ 0.
    fn best_flux(&self) -> f64 {
        let weight = self.source_weight();
        if weight <= 0.0 || self.score(0.0) <= 0.0 {
            return 0.0;
        }
        let mut hi = (self.counts() / weight).max(f64::MIN_POSITIVE);
        for _ in 0..MAX_BRACKET_STEPS {
            if self.score(hi) < 0.0 {
                break;
            }
            hi *= 2.0;
        }
        let mut lo = 0.0;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if self.score(mid) > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Flux above `best` where `2ΔL` reaches `threshold`.
    fn upper_limit(&self, best: f64, threshold: f64) -> f64 {
        let weight = self.source_weight();
        if threshold <= 0.0 || weight <= 0.0 {
            return best;
        }
        let target = self.log_likelihood(best) - threshold / 2.0;
        let mut step = best.max(self.counts().max(1.0) / weight);
        let mut hi = best + step;
        for _ in 0..MAX_BRACKET_STEPS {
            if self.log_likelihood(hi) < target {
                break;
            }
            step *= 2.0;
            hi = best + step;
        }
        let mut lo = best;
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if self.log_likelihood(mid) > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }
}

// =============================================================================
// MAP MODELS
// =============================================================================

/// A map prepared for fitting: response values and running model.
struct MapModel<'a> {
    map: &'a AnalysisMap,
    sigma_deg: f64,
    scale: f64,
    gal_coeff: f64,
    iso_coeff: f64,
    /// Background plus every source already in the model
    model: DMatrix<f64>,
}

impl<'a> MapModel<'a> {
    fn band(&self) -> &EnergyBand {
        &self.map.exposure.band
    }

    /// Full-map expected counts of a source at (l, b) with the given flux.
    fn source_counts(&self, l: f64, b: f64, index: f64, flux: f64) -> DMatrix<f64> {
        let template = psf_template(&self.map.exposure.geometry, l, b, self.sigma_deg);
        let norm = flux * self.scale * band_fraction(index, self.band());
        template.component_mul(&self.map.exposure.data) * norm
    }
}

/// Builds the fit region of a source at `position`, selecting pixels within
/// `radius` of `center`.
fn build_region(
    models: &[MapModel<'_>],
    center: (f64, f64),
    position: (f64, f64),
    index: f64,
    radius: f64,
) -> Region {
    let mut pixels = Vec::new();
    for m in models {
        let geometry = &m.map.exposure.geometry;
        let area = geometry.pixel_area_deg2();
        let norm = m.scale * band_fraction(index, m.band());
        for row in 0..geometry.rows {
            for col in 0..geometry.cols {
                let (pl, pb) = geometry.pixel_center(row, col);
                if angular_distance_deg(pl, pb, center.0, center.1) > radius {
                    continue;
                }
                let d = angular_distance_deg(pl, pb, position.0, position.1);
                pixels.push(Pixel {
                    n: m.map.counts.data[(row, col)],
                    base: m.model[(row, col)],
                    s: norm * psf_weight(d, m.sigma_deg, area) * m.map.exposure.data[(row, col)],
                });
            }
        }
    }
    Region { pixels }
}

/// Re-estimates an emission coefficient from the counts left unexplained
/// by everything else in the model.
fn estimate_coefficient(counts: f64, explained: f64, unit_model: f64, fallback: f64) -> f64 {
    if unit_model > 0.0 {
        ((counts - explained) / unit_model).max(0.0)
    } else {
        fallback
    }
}

// =============================================================================
// REPORTS
// =============================================================================

#[derive(Debug, Serialize)]
struct MapReport {
    band: EnergyBand,
    counts: f64,
    gal_coeff: f64,
    iso_coeff: f64,
}

#[derive(Debug, Serialize)]
struct FitReport<'a> {
    params: FitParams,
    emission: EmissionModes,
    maps: &'a [MapReport],
    sources: &'a [SourceDescriptor],
}

// =============================================================================
// ENGINE
// =============================================================================

/// Poisson maximum-likelihood multi-source fit engine.
pub struct LikelihoodFitEngine {
    /// Response tables, kept across `reset()`
    response: Option<ResponseTables>,

    /// Directory receiving `.res`, `.multi` and `.log` files
    output_dir: PathBuf,

    maps: Vec<AnalysisMap>,
    emission: EmissionModes,

    /// Result of the last `do_fit`
    current: Vec<SourceDescriptor>,
    current_params: FitParams,
    current_maps: Vec<MapReport>,

    /// True when `current` has not been committed to the log yet
    uncommitted: bool,

    /// Fits performed since the last `log_sources`
    pending_log: Vec<Vec<SourceDescriptor>>,
}

impl LikelihoodFitEngine {
    /// Creates an engine writing its products into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            response: None,
            output_dir: output_dir.into(),
            maps: Vec::new(),
            emission: EmissionModes::default(),
            current: Vec::new(),
            current_params: FitParams::default(),
            current_maps: Vec::new(),
            uncommitted: false,
            pending_log: Vec::new(),
        }
    }

    /// Creates an engine with response tables already loaded.
    pub fn with_response(output_dir: impl Into<PathBuf>, response: ResponseTables) -> Self {
        let mut engine = Self::new(output_dir);
        engine.response = Some(response);
        engine
    }

    #[cfg(test)]
    fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Number of fits waiting for the next `log_sources`.
    #[cfg(test)]
    fn pending_log_len(&self) -> usize {
        self.pending_log.len() + usize::from(self.uncommitted)
    }

    fn output_path(&self, file_base: &str, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", file_base, extension))
    }

    fn commit(&mut self) {
        if self.uncommitted {
            self.pending_log.push(self.current.clone());
            self.uncommitted = false;
        }
    }

    /// Checks analysis geometry and prepares per-map models.
    fn prepare<'a>(
        maps: &'a [AnalysisMap],
        response: &ResponseTables,
        emission: EmissionModes,
        sources: &[SourceDescriptor],
        radius: f64,
    ) -> Result<Vec<MapModel<'a>>, EngineError> {
        let mut models = Vec::with_capacity(maps.len());
        for (k, map) in maps.iter().enumerate() {
            let geometry = &map.exposure.geometry;
            if !map.counts.compatible(&map.exposure) {
                return Err(EngineError::geometry(format!(
                    "map {}: counts and exposure grids differ",
                    k
                )));
            }
            if radius > geometry.half_extent_deg() {
                return Err(EngineError::geometry(format!(
                    "map {}: analysis radius {} exceeds map half extent {}",
                    k,
                    radius,
                    geometry.half_extent_deg()
                )));
            }
            if let Some(off) = sources
                .iter()
                .find(|s| s.fix_flag.fits_flux() && !geometry.contains(s.l, s.b))
            {
                return Err(EngineError::geometry(format!(
                    "map {}: source {} at ({}, {}) lies outside the map",
                    k, off.name, off.l, off.b
                )));
            }

            let band = map.exposure.band;
            let mut model = MapModel {
                map,
                sigma_deg: response.psf_sigma_deg(&band)?,
                scale: response.exposure_scale(&band)?,
                gal_coeff: map.gal_coeff.unwrap_or(0.0),
                iso_coeff: map.iso_coeff.unwrap_or(0.0),
                model: DMatrix::zeros(geometry.rows, geometry.cols),
            };

            // Known sources first: they are part of the background
            let mut fixed = DMatrix::zeros(geometry.rows, geometry.cols);
            for s in sources.iter().filter(|s| !s.fix_flag.fits_flux()) {
                fixed += model.source_counts(s.l, s.b, s.index, s.flux);
            }

            let counts = map.counts.total();
            let fixed_total = fixed.sum();
            if emission.diffuse == CoefficientMode::Free {
                let unit = background_counts(&map.exposure, Some(&map.diffuse), 1.0, 0.0).sum();
                let iso = background_counts(&map.exposure, None, 0.0, model.iso_coeff).sum();
                model.gal_coeff = estimate_coefficient(counts, fixed_total + iso, unit, model.gal_coeff);
            }
            if emission.isotropic == CoefficientMode::Free {
                let unit = background_counts(&map.exposure, None, 0.0, 1.0).sum();
                let gal = background_counts(&map.exposure, Some(&map.diffuse), model.gal_coeff, 0.0).sum();
                model.iso_coeff = estimate_coefficient(counts, fixed_total + gal, unit, model.iso_coeff);
            }

            model.model = background_counts(
                &map.exposure,
                Some(&map.diffuse),
                model.gal_coeff,
                model.iso_coeff,
            ) + fixed;
            models.push(model);
        }
        Ok(models)
    }

    /// Fits flux (and position for free sources) of one source.
    fn fit_source(
        models: &[MapModel<'_>],
        source: &SourceDescriptor,
        params: &FitParams,
    ) -> Result<SourceDescriptor, EngineError> {
        let center = (source.l, source.b);
        let profile = |position: (f64, f64)| {
            let region = build_region(models, center, position, source.index, params.radius_deg);
            let flux = region.best_flux();
            let log_l = region.log_likelihood(flux);
            (region, flux, log_l)
        };

        let mut position = center;
        let (mut region, mut flux, mut log_l) = profile(position);

        if source.fix_flag.fits_position() {
            let min_bin = models
                .iter()
                .map(|m| m.map.exposure.geometry.bin_size_deg)
                .fold(f64::INFINITY, f64::min);
            let mut step = min_bin;
            for _ in 0..MAX_POSITION_STEPS {
                if step < min_bin / 8.0 {
                    break;
                }
                let mut best: Option<((f64, f64), Region, f64, f64)> = None;
                for dl in [-1.0, 0.0, 1.0] {
                    for db in [-1.0, 0.0, 1.0] {
                        if dl == 0.0 && db == 0.0 {
                            continue;
                        }
                        let candidate = (
                            normalize_longitude(position.0 + dl * step),
                            position.1 + db * step,
                        );
                        let on_maps = models
                            .iter()
                            .all(|m| m.map.exposure.geometry.contains(candidate.0, candidate.1));
                        let within_limit = source.location_limit <= 0.0
                            || angular_distance_deg(candidate.0, candidate.1, center.0, center.1)
                                <= source.location_limit;
                        if !on_maps || !within_limit {
                            continue;
                        }
                        let (r, f, l) = profile(candidate);
                        let threshold = best.as_ref().map_or(log_l, |b| b.3);
                        if l > threshold + 1e-9 {
                            best = Some((candidate, r, f, l));
                        }
                    }
                }
                match best {
                    Some((p, r, f, l)) => {
                        position = p;
                        region = r;
                        flux = f;
                        log_l = l;
                    }
                    None => step /= 2.0,
                }
            }
        }

        if !flux.is_finite() || !log_l.is_finite() {
            return Err(EngineError::fit(
                FIT_FAILURE_STATUS,
                format!("likelihood diverged for source {}", source.name),
            ));
        }

        let ts = (2.0 * (log_l - region.log_likelihood(0.0))).max(0.0);
        let information = region.information(flux);
        let location_error = if source.fix_flag.fits_position() {
            let sigma = models.iter().map(|m| m.sigma_deg).fold(f64::INFINITY, f64::min);
            let source_counts = (flux * region.source_weight()).max(1.0);
            sigma / source_counts.sqrt() * location_threshold(params.location_cl).sqrt()
        } else {
            0.0
        };

        let mut fitted = source.clone();
        fitted.l = position.0;
        fitted.b = position.1;
        fitted.flux = flux;
        fitted.fit = FitResult {
            ts,
            flux_error: if information > 0.0 { information.sqrt().recip() } else { 0.0 },
            upper_limit: region.upper_limit(flux, upper_limit_threshold(params.upper_limit_cl)),
            location_error,
        };

        // Below its detection floor the source is dropped for later passes
        if source.min_sqrt_ts > 0.0 && ts.sqrt() < source.min_sqrt_ts {
            fitted.flux = 0.0;
            fitted.fix_flag = FixFlag::AllFixed;
        }
        Ok(fitted)
    }
}

impl FitEngine for LikelihoodFitEngine {
    fn set_psf(&mut self, paths: &ResponsePaths) -> Result<(), EngineError> {
        self.response = Some(ResponseTables::load(paths)?);
        Ok(())
    }

    fn set_maps(&mut self, maps: Vec<AnalysisMap>, emission: EmissionModes) {
        self.commit();
        self.maps = maps;
        self.emission = emission;
    }

    fn do_fit(&mut self, sources: &[SourceDescriptor], params: &FitParams) -> Result<(), EngineError> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| EngineError::response("no response loaded (set_psf not called)"))?;
        if self.maps.is_empty() {
            return Err(EngineError::fit(FIT_FAILURE_STATUS, "no maps installed"));
        }

        let mut models = Self::prepare(&self.maps, response, self.emission, sources, params.radius_deg)?;
        let mut results = Vec::with_capacity(sources.len());

        for source in sources {
            if !source.fix_flag.fits_flux() {
                let mut fixed = source.clone();
                fixed.fit = FitResult::default();
                results.push(fixed);
                continue;
            }
            let fitted = Self::fit_source(&models, source, params)?;
            if fitted.flux > 0.0 {
                for m in models.iter_mut() {
                    let add = m.source_counts(fitted.l, fitted.b, fitted.index, fitted.flux);
                    m.model += add;
                }
            }
            results.push(fitted);
        }

        self.current_maps = models
            .iter()
            .map(|m| MapReport {
                band: *m.band(),
                counts: m.map.counts.total(),
                gal_coeff: m.gal_coeff,
                iso_coeff: m.iso_coeff,
            })
            .collect();
        self.current = results;
        self.current_params = *params;
        self.uncommitted = true;
        Ok(())
    }

    fn fit_data(&self) -> Vec<SourceDescriptor> {
        self.current.clone()
    }

    fn reset(&mut self) {
        self.maps.clear();
        self.current.clear();
        self.current_maps.clear();
        self.current_params = FitParams::default();
        self.emission = EmissionModes::default();
        self.uncommitted = false;
        self.pending_log.clear();
    }

    fn log_sources(
        &mut self,
        output_base: &str,
        run_index: usize,
        simulated: &[SkyMap],
        catalog_len: usize,
    ) -> Result<(), EngineError> {
        self.commit();

        let mut line = run_index.to_string();
        for map in simulated.iter().take(catalog_len) {
            let _ = write!(line, " {}", map.total());
        }
        for block in self.pending_log.drain(..) {
            line.push_str(" |");
            for s in &block {
                let _ = write!(line, " {} {:.4} {:e}", s.name, s.fit.ts, s.flux);
            }
        }
        line.push('\n');

        let path = self.output_path(output_base, "log");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn write(&self, file_base: &str) -> Result<(), EngineError> {
        let report = FitReport {
            params: self.current_params,
            emission: self.emission,
            maps: &self.current_maps,
            sources: &self.current,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| EngineError::Io(e.to_string()))?;
        fs::write(self.output_path(file_base, "res"), json)?;
        Ok(())
    }

    fn write_sources(&self, file_base: &str) -> Result<(), EngineError> {
        let catalog = SourceCatalog::from_sources(self.current.clone());
        catalog.write(&self.output_path(file_base, "multi"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gammasim_env::{MapGeometry, TimeRange};
    use tempfile::TempDir;

    const EXPOSURE: f64 = 1e8;

    fn band() -> EnergyBand {
        EnergyBand::new(100.0, 10000.0)
    }

    fn geometry() -> MapGeometry {
        MapGeometry::new(30.0, 10.0, 0.5, 40, 40)
    }

    fn time() -> TimeRange {
        TimeRange::new(0.0, 86400.0)
    }

    /// Noise-free counts of a source plus a flat isotropic background.
    fn analysis_map(sources: &[(f64, f64, f64)], iso: f64) -> AnalysisMap {
        analysis_map_on(geometry(), sources, iso)
    }

    fn analysis_map_on(geom: MapGeometry, sources: &[(f64, f64, f64)], iso: f64) -> AnalysisMap {
        let exposure = SkyMap::filled(geom, band(), time(), EXPOSURE);
        let mut counts = SkyMap::zeros(geom, band(), time());
        counts.data = background_counts(&exposure, None, 0.0, iso);
        for &(l, b, flux) in sources {
            let template = psf_template(&geom, l, b, 1.0);
            counts.data += template * (flux * EXPOSURE * band_fraction(2.0, &band()));
        }
        AnalysisMap {
            counts,
            exposure,
            diffuse: SkyMap::zeros(geom, band(), time()),
            gal_coeff: Some(0.0),
            iso_coeff: Some(iso),
        }
    }

    /// Engine writing into its own scratch directory, dropped with the engine.
    fn engine() -> (LikelihoodFitEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = LikelihoodFitEngine::with_response(dir.path(), ResponseTables::ideal(1.0));
        (engine, dir)
    }

    fn params() -> FitParams {
        FitParams {
            radius_deg: 5.0,
            upper_limit_cl: 0.95,
            location_cl: 0.95,
        }
    }

    #[test]
    fn test_recovers_flux_of_bright_source() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[(30.0, 10.0, 1e-5)], 1e-3)], EmissionModes::default());
        let source = SourceDescriptor::new("SRC", 30.0, 10.0, 2.0, 5e-6, FixFlag::PartiallyFixed);

        engine.do_fit(&[source], &params()).unwrap();
        let fit = &engine.fit_data()[0];

        assert_relative_eq!(fit.flux, 1e-5, max_relative = 1e-3);
        assert!(fit.ts() > 100.0);
        assert!(fit.fit.upper_limit > fit.flux);
        assert!(fit.fit.flux_error > 0.0);
        assert_eq!(fit.fix_flag, FixFlag::PartiallyFixed);
    }

    #[test]
    fn test_source_across_longitude_zero_is_on_map() {
        let (mut engine, _dir) = engine();
        let map = analysis_map_on(MapGeometry::new(0.0, 0.0, 0.5, 40, 40), &[(359.5, 0.0, 1e-5)], 1e-3);
        let gc = SourceDescriptor::new("GC", 359.5, 0.0, 2.0, 5e-6, FixFlag::PartiallyFixed);
        let free = SourceDescriptor::new("GCF", 0.25, 0.0, 2.0, 5e-6, FixFlag::Free);

        engine.set_maps(vec![map.clone()], EmissionModes::default());
        engine.do_fit(&[gc], &params()).unwrap();
        assert_relative_eq!(engine.fit_data()[0].flux, 1e-5, max_relative = 1e-3);

        engine.set_maps(vec![map], EmissionModes::default());
        engine.do_fit(&[free], &params()).unwrap();
        let fit = &engine.fit_data()[0];
        assert!((0.0..360.0).contains(&fit.l));
        assert!(angular_distance_deg(fit.l, fit.b, 359.5, 0.0) < 0.25);
    }

    #[test]
    fn test_all_fixed_sources_have_zero_ts() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[(30.0, 10.0, 1e-6)], 0.1)], EmissionModes::default());
        let source = SourceDescriptor::new("SRC", 30.0, 10.0, 2.0, 1e-6, FixFlag::AllFixed);

        engine.do_fit(&[source.clone()], &params()).unwrap();
        let fit = &engine.fit_data()[0];

        assert_eq!(fit.ts(), 0.0);
        assert_eq!(fit.flux, source.flux);
    }

    #[test]
    fn test_free_source_moves_towards_true_position() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[(30.0, 10.0, 1e-6)], 0.1)], EmissionModes::default());
        let source = SourceDescriptor::new("SRC", 31.0, 10.75, 2.0, 5e-7, FixFlag::Free);

        engine.do_fit(&[source], &params()).unwrap();
        let fit = &engine.fit_data()[0];

        assert!(angular_distance_deg(fit.l, fit.b, 30.0, 10.0) < 0.25);
        assert!(fit.fit.location_error > 0.0);
    }

    #[test]
    fn test_location_limit_bounds_the_search() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[(30.0, 10.0, 1e-6)], 0.1)], EmissionModes::default());
        let mut source = SourceDescriptor::new("SRC", 32.0, 10.0, 2.0, 5e-7, FixFlag::Free);
        source.location_limit = 0.5;

        engine.do_fit(&[source], &params()).unwrap();
        let fit = &engine.fit_data()[0];

        assert!(angular_distance_deg(fit.l, fit.b, 32.0, 10.0) <= 0.5 + 1e-9);
    }

    #[test]
    fn test_weak_source_is_fixed_for_second_pass() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[], 0.1)], EmissionModes::default());
        let mut source = SourceDescriptor::new("GHOST", 30.0, 10.0, 2.0, 1e-7, FixFlag::PartiallyFixed);
        source.min_sqrt_ts = 3.0;

        engine.do_fit(&[source], &params()).unwrap();
        let fit = &engine.fit_data()[0];

        assert_eq!(fit.fix_flag, FixFlag::AllFixed);
        assert_eq!(fit.flux, 0.0);
    }

    #[test]
    fn test_free_isotropic_coefficient_is_estimated() {
        let (mut engine, _dir) = engine();
        let mut map = analysis_map(&[], 0.2);
        map.iso_coeff = Some(5.0);
        engine.set_maps(
            vec![map],
            EmissionModes { diffuse: CoefficientMode::Fixed, isotropic: CoefficientMode::Free },
        );

        engine.do_fit(&[], &params()).unwrap();
        assert_relative_eq!(engine.current_maps[0].iso_coeff, 0.2, max_relative = 1e-9);
    }

    #[test]
    fn test_radius_exceeding_map_is_geometry_error() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[], 0.1)], EmissionModes::default());
        let wide = FitParams { radius_deg: 15.0, ..params() };

        let err = engine.do_fit(&[], &wide).unwrap_err();
        assert!(matches!(err, EngineError::Geometry(_)));
    }

    #[test]
    fn test_fit_without_response_fails() {
        let dir = TempDir::new().unwrap();
        let mut engine = LikelihoodFitEngine::new(dir.path());
        engine.set_maps(vec![analysis_map(&[], 0.1)], EmissionModes::default());

        let err = engine.do_fit(&[], &params()).unwrap_err();
        assert!(matches!(err, EngineError::Response(_)));
    }

    #[test]
    fn test_reset_keeps_response() {
        let (mut engine, _dir) = engine();
        engine.set_maps(vec![analysis_map(&[], 0.1)], EmissionModes::default());
        engine.do_fit(&[], &params()).unwrap();

        engine.reset();

        assert!(engine.has_response());
        assert!(engine.fit_data().is_empty());
        assert_eq!(engine.pending_log_len(), 0);
    }

    #[test]
    fn test_log_sources_writes_one_line_per_run() {
        let (mut engine, dir) = engine();
        let source = SourceDescriptor::new("SRC", 30.0, 10.0, 2.0, 5e-7, FixFlag::PartiallyFixed);
        let map = analysis_map(&[(30.0, 10.0, 1e-6)], 0.1);

        for _ in 0..3 {
            engine.set_maps(vec![map.clone()], EmissionModes::default());
            engine.do_fit(&[source.clone()], &params()).unwrap();
        }
        assert_eq!(engine.pending_log_len(), 3);
        engine
            .log_sources("concise", 1, &[map.counts.clone(), map.counts.clone()], 2)
            .unwrap();

        let text = fs::read_to_string(dir.path().join("concise.log")).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text.matches('|').count(), 3);
        assert_eq!(engine.pending_log_len(), 0);
    }

    #[test]
    fn test_write_products() {
        let (mut engine, dir) = engine();
        engine.set_maps(vec![analysis_map(&[(30.0, 10.0, 1e-6)], 0.1)], EmissionModes::default());
        let source = SourceDescriptor::new("SRC", 30.0, 10.0, 2.0, 5e-7, FixFlag::PartiallyFixed);
        engine.do_fit(&[source], &params()).unwrap();

        engine.write("0000000001_out").unwrap();
        engine.write_sources("0000000001_out").unwrap();

        assert!(dir.path().join("0000000001_out.res").exists());
        let written = SourceCatalog::read(&dir.path().join("0000000001_out.multi")).unwrap();
        assert_eq!(written.sources()[0].name, "SRC");
    }
}
