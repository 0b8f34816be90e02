//! Test doubles and fixtures shared by the campaign tests.

use crate::config::CampaignConfig;
use crate::store::{MemoryDiffuseStore, MemoryMapStore};
use gammasim_core::SourceCatalog;
use gammasim_env::{
    AnalysisMap, EmissionModes, EnergyBand, EngineError, FitEngine, FitParams, FixFlag, MapGeometry,
    ResponsePaths, SkyMap, SourceDescriptor, TimeRange,
};
use std::cell::{Ref, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Everything the recording engines observed, shared across instances.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub engines_built: usize,
    pub psf_loads: usize,
    pub resets: usize,
    pub fit_calls: usize,

    /// Number of maps installed by each `set_maps`
    pub map_sets: Vec<usize>,

    /// Total counts of the maps installed by each `set_maps`
    pub counts_totals: Vec<f64>,

    /// Diffuse coefficient of the first map of each `set_maps`
    pub gal_coeffs: Vec<Option<f64>>,

    /// Sources passed to each `do_fit`
    pub fit_inputs: Vec<Vec<SourceDescriptor>>,

    /// Fits the engine had performed since its last reset, at each `do_fit`
    pub state_depth: Vec<usize>,

    pub reports: Vec<String>,
    pub source_lists: Vec<String>,

    /// Run index of each concise log line
    pub concise_runs: Vec<usize>,

    /// Analyses covered by each concise log line
    pub concise_analyses: Vec<usize>,
}

/// Scripted behaviour of `RecordingFitEngine`, shared by every engine a
/// factory builds.
#[derive(Clone)]
pub struct EngineScript {
    log: Rc<RefCell<EngineLog>>,
    ts: f64,
    demote: Vec<String>,
    fail_on_call: Option<usize>,
    failure: Rc<RefCell<Option<EngineError>>>,
    fail_writes: bool,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            log: Rc::new(RefCell::new(EngineLog::default())),
            ts: 25.0,
            demote: Vec::new(),
            fail_on_call: None,
            failure: Rc::new(RefCell::new(None)),
            fail_writes: false,
        }
    }
}

impl EngineScript {
    /// TS reported for every fitted (not AllFixed) source.
    pub fn with_ts(mut self, ts: f64) -> Self {
        self.ts = ts;
        self
    }

    /// Source that every fit turns AllFixed with zero flux.
    pub fn demote(mut self, name: &str) -> Self {
        self.demote.push(name.to_string());
        self
    }

    /// Makes the first `do_fit` fail with `err`.
    pub fn fail_fit(self, err: EngineError) -> Self {
        self.fail_fit_on(1, err)
    }

    /// Makes the `call`-th `do_fit` (1-based, across engines) fail.
    pub fn fail_fit_on(mut self, call: usize, err: EngineError) -> Self {
        self.fail_on_call = Some(call);
        *self.failure.borrow_mut() = Some(err);
        self
    }

    /// Makes every report, source list and log write fail.
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn log(&self) -> Ref<'_, EngineLog> {
        self.log.borrow()
    }
}

/// Fit engine double that records every call and returns scripted fits.
pub struct RecordingFitEngine {
    script: EngineScript,
    results: Vec<SourceDescriptor>,
    fits_since_reset: usize,
    pending: usize,
}

impl RecordingFitEngine {
    pub fn new(script: EngineScript) -> Self {
        script.log.borrow_mut().engines_built += 1;
        Self {
            script,
            results: Vec::new(),
            fits_since_reset: 0,
            pending: 0,
        }
    }

    fn write_failure(&self, what: &str, base: &str) -> Result<(), EngineError> {
        if self.script.fail_writes {
            Err(EngineError::Io(format!("cannot write {} {}", what, base)))
        } else {
            Ok(())
        }
    }
}

impl FitEngine for RecordingFitEngine {
    fn set_psf(&mut self, _paths: &ResponsePaths) -> Result<(), EngineError> {
        self.script.log.borrow_mut().psf_loads += 1;
        Ok(())
    }

    fn set_maps(&mut self, maps: Vec<AnalysisMap>, _emission: EmissionModes) {
        let mut log = self.script.log.borrow_mut();
        log.map_sets.push(maps.len());
        log.counts_totals.push(maps.iter().map(|m| m.counts.total()).sum());
        log.gal_coeffs.push(maps.first().and_then(|m| m.gal_coeff));
        self.pending += 1;
    }

    fn do_fit(&mut self, sources: &[SourceDescriptor], _params: &FitParams) -> Result<(), EngineError> {
        let call = {
            let mut log = self.script.log.borrow_mut();
            log.fit_calls += 1;
            log.fit_calls
        };
        if self.script.fail_on_call == Some(call) {
            if let Some(err) = self.script.failure.borrow_mut().take() {
                return Err(err);
            }
        }

        self.fits_since_reset += 1;
        let mut log = self.script.log.borrow_mut();
        log.fit_inputs.push(sources.to_vec());
        log.state_depth.push(self.fits_since_reset);

        self.results = sources
            .iter()
            .map(|s| {
                let mut out = s.clone();
                if s.fix_flag.fits_flux() {
                    out.fit.ts = self.script.ts;
                    if self.script.demote.contains(&s.name) {
                        out.flux = 0.0;
                        out.fix_flag = FixFlag::AllFixed;
                    }
                } else {
                    out.fit.ts = 0.0;
                }
                out
            })
            .collect();
        Ok(())
    }

    fn fit_data(&self) -> Vec<SourceDescriptor> {
        self.results.clone()
    }

    fn reset(&mut self) {
        self.results.clear();
        self.fits_since_reset = 0;
        self.pending = 0;
        self.script.log.borrow_mut().resets += 1;
    }

    fn log_sources(
        &mut self,
        output_base: &str,
        run_index: usize,
        _simulated: &[SkyMap],
        _catalog_len: usize,
    ) -> Result<(), EngineError> {
        self.write_failure("log", output_base)?;
        let mut log = self.script.log.borrow_mut();
        log.concise_runs.push(run_index);
        log.concise_analyses.push(self.pending);
        self.pending = 0;
        Ok(())
    }

    fn write(&self, file_base: &str) -> Result<(), EngineError> {
        self.write_failure("report", file_base)?;
        self.script.log.borrow_mut().reports.push(file_base.to_string());
        Ok(())
    }

    fn write_sources(&self, file_base: &str) -> Result<(), EngineError> {
        self.write_failure("source list", file_base)?;
        self.script.log.borrow_mut().source_lists.push(file_base.to_string());
        Ok(())
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

pub const FIXTURE_MATRICES: &str = "I0025";

pub fn fixture_geometry() -> MapGeometry {
    MapGeometry::new(30.0, 10.0, 1.0, 10, 10)
}

pub fn fixture_band() -> EnergyBand {
    EnergyBand::new(100.0, 10000.0)
}

/// `n` analysis maps with flat counts, exposure and diffuse.
pub fn analysis_maps(n: usize) -> Vec<AnalysisMap> {
    let time = TimeRange::new(0.0, 100.0);
    (0..n)
        .map(|_| AnalysisMap {
            counts: SkyMap::filled(fixture_geometry(), fixture_band(), time, 2.0),
            exposure: SkyMap::filled(fixture_geometry(), fixture_band(), time, 1.0e7),
            diffuse: SkyMap::filled(fixture_geometry(), fixture_band(), time, 1.0e-5),
            gal_coeff: Some(1.0),
            iso_coeff: Some(1.0),
        })
        .collect()
}

pub fn all_fixed_source() -> SourceDescriptor {
    SourceDescriptor::new("FIXED", 30.0, 10.0, 2.0, 1.0e-6, FixFlag::AllFixed)
}

pub fn free_source(name: &str) -> SourceDescriptor {
    SourceDescriptor::new(name, 30.5, 10.5, 2.0, 1.0e-6, FixFlag::Free)
}

/// A campaign on disk and in memory: catalogs and response tables in a
/// scratch directory, exposure maps in a `MemoryMapStore`, one diffuse map
/// in a `MemoryDiffuseStore`. The scratch directory goes away with the
/// fixture.
pub struct Fixture {
    pub dir: TempDir,
    pub maps: MemoryMapStore,
    pub diffuse: MemoryDiffuseStore,
    pub config: CampaignConfig,
}

impl Fixture {
    /// Builds a campaign with `n_maps` map entries in both map lists and
    /// `sources` in both source lists.
    pub fn new(name: &str, n_maps: usize, sources: &[SourceDescriptor]) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(&format!("gammasim_sim_{}_", name))
            .tempdir()
            .unwrap();

        let maps = MemoryMapStore::new();
        for m in 0..n_maps {
            let time = TimeRange::new(m as f64 * 100.0, (m + 1) as f64 * 100.0);
            maps.insert(
                format!("exp/m{}.exp", m),
                SkyMap::filled(fixture_geometry(), fixture_band(), time, 1.0e7),
            );
        }

        let mut diffuse = MemoryDiffuseStore::new();
        diffuse.insert(
            fixture_band(),
            FIXTURE_MATRICES,
            SkyMap::filled(fixture_geometry(), fixture_band(), TimeRange::new(0.0, 0.0), 1.0e-5),
        );

        let table = r#"{ "bands": [ { "emin": 10, "emax": 100000, "value": 1.0 } ] }"#;
        let response = ResponsePaths {
            psd: write(dir.path(), "psf.psd", table),
            sar: write(dir.path(), "area.sar", table),
            edp: write(dir.path(), "disp.edp", table),
        };

        let map_list = map_list_text(n_maps);
        let sources_text = SourceCatalog::from_sources(sources.to_vec()).to_text();
        let config = CampaignConfig {
            nruns: 1,
            seed: 7,
            response,
            map_list_sim: write(dir.path(), "sim.maplist", &map_list),
            source_list_sim: write(dir.path(), "sim.multi", &sources_text),
            map_list_analysis: write(dir.path(), "analysis.maplist", &map_list),
            source_list_analysis: write(dir.path(), "analysis.multi", &sources_text),
            outfile: "sim".to_string(),
            output_dir: PathBuf::from("out"),
            res_matrices: FIXTURE_MATRICES.to_string(),
            ..Default::default()
        };

        Self {
            dir,
            maps,
            diffuse,
            config,
        }
    }

    /// Replaces the analysis map list with `n_maps` entries whose diffuse
    /// coefficient is the entry number.
    pub fn with_analysis_maps(mut self, n_maps: usize) -> Self {
        let text: String = (0..n_maps)
            .map(|m| format!("cts/m{0}.cts exp/m{0}.exp 100 10000 {1} {2} {3} 1.0\n", m, m * 100, (m + 1) * 100, m + 1))
            .collect();
        self.config.map_list_analysis = write(self.dir.path(), "analysis.maplist", &text);
        self
    }

    /// Writes an extra file into the scratch directory.
    pub fn file(&self, name: &str, text: &str) -> PathBuf {
        write(self.dir.path(), name, text)
    }
}

fn map_list_text(n_maps: usize) -> String {
    (0..n_maps)
        .map(|m| format!("cts/m{0}.cts exp/m{0}.exp 100 10000 {1} {2} 1.0 1.0\n", m, m * 100, (m + 1) * 100))
        .collect()
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}
