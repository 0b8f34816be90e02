//! Fit engine contract.

use crate::error::EngineError;
use crate::types::{AnalysisMap, EmissionModes, FitParams, ResponsePaths, SkyMap, SourceDescriptor};

/// The multi-source maximum-likelihood fit engine.
///
/// The campaign driver treats the engine as opaque: it loads response
/// data, hands over one set of analysis maps at a time, asks for one or
/// two fits, and reads back the fitted sources.
///
/// # Lifetime
///
/// By default the driver builds a fresh engine per run. In shared mode a
/// single engine serves every run and `reset()` is called at each run
/// boundary; `reset()` must drop all fit state but may keep response
/// tables loaded by `set_psf()`.
///
/// # Implementations
///
/// - **Reference**: `LikelihoodFitEngine` in `gammasim_core`
/// - **Tests**: `RecordingFitEngine` in `gammasim_sim`
pub trait FitEngine {
    /// Loads the instrument response (PSF, effective area, dispersion).
    fn set_psf(&mut self, paths: &ResponsePaths) -> Result<(), EngineError>;

    /// Installs the maps for the next fit.
    ///
    /// Installing maps starts a new analysis: the fit of the previous map
    /// set, if any, is committed to the pending log.
    fn set_maps(&mut self, maps: Vec<AnalysisMap>, emission: EmissionModes);

    /// Fits `sources` against the installed maps.
    ///
    /// # Errors
    /// * `EngineError::Geometry` - radius exceeds a map's extent
    /// * `EngineError::Response` - no response loaded for a map's band
    /// * `EngineError::Fit` - internal failure, with the engine's status
    fn do_fit(&mut self, sources: &[SourceDescriptor], params: &FitParams) -> Result<(), EngineError>;

    /// Returns the sources of the last fit, with results and final flags.
    fn fit_data(&self) -> Vec<SourceDescriptor>;

    /// Clears fit state and pending log entries, keeping response tables.
    fn reset(&mut self);

    /// Appends one line for this run to the shared concise log.
    ///
    /// The line covers every analysis performed since the previous call,
    /// plus the simulated total counts of the first `catalog_len` maps.
    fn log_sources(
        &mut self,
        output_base: &str,
        run_index: usize,
        simulated: &[SkyMap],
        catalog_len: usize,
    ) -> Result<(), EngineError>;

    /// Writes the fit report for the last fit to `<file_base>.res`.
    fn write(&self, file_base: &str) -> Result<(), EngineError>;

    /// Writes the fitted sources to `<file_base>.multi`.
    fn write_sources(&self, file_base: &str) -> Result<(), EngineError>;
}
