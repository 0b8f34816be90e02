//! Campaign runner - the run/block loop.
//!
//! A campaign loads its inputs once, then for each run draws a simulated
//! map array, aggregates it into blocks, fits every block and folds the
//! fitted TS into the campaign state. Write failures are logged and
//! counted; any other failure ends the campaign.

use crate::accumulator::{CampaignState, ResultAccumulator, TsSummary};
use crate::aggregator::BlockAggregator;
use crate::config::{CampaignConfig, EngineLifetime};
use crate::exporter::AnalysisRecord;
use crate::inputs::CampaignInputs;
use crate::naming::{block_map_name, single_map_name, sum_map_name};
use crate::orchestrator::{AnalysisOutcome, AnalysisTarget, FitOrchestrator};
use crate::simulation::SimulationError;
use gammasim_env::{AnalysisMap, DiffuseStore, EngineError, FitEngine, MapStore, SkyMap, StoreError};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Exit status of configuration failures (`EX_CONFIG`).
pub const EXIT_CONFIG: i32 = 78;

/// Exit status of simulation model failures (`EX_SOFTWARE`).
pub const EXIT_SIMULATION: i32 = 70;

/// Fatal campaign errors.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Catalog, response or exposure problem found before the first run
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required diffuse map is missing or unreadable
    #[error("Diffuse map unavailable: {0}")]
    Diffuse(#[source] StoreError),

    /// The fit engine failed
    #[error("Fit failed: {0}")]
    Fit(#[from] EngineError),

    /// The expected-count model could not be sampled
    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),
}

impl CampaignError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code. Engine and store statuses pass through unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            CampaignError::Config(_) => EXIT_CONFIG,
            CampaignError::Diffuse(e) => e.status(),
            CampaignError::Fit(e) => e.status(),
            CampaignError::Simulation(_) => EXIT_SIMULATION,
        }
    }
}

/// Outcome of a completed campaign.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub runs_completed: usize,

    /// Analyses (or sums) per run
    pub blocks_per_run: usize,

    pub state: CampaignState,

    /// Total and mean TS, if anything was analysed
    pub ts: Option<TsSummary>,

    /// Maps and result files that could not be written
    pub write_failures: usize,

    /// Every analysis in execution order; empty unless the campaign was
    /// configured to collect them
    pub analyses: Vec<AnalysisRecord>,
}

/// Results collected while the campaign runs.
struct Progress {
    accumulator: ResultAccumulator,
    analyses: Option<Vec<AnalysisRecord>>,
    write_failures: usize,
}

impl Progress {
    fn new(collect_analyses: bool) -> Self {
        Self {
            accumulator: ResultAccumulator::default(),
            analyses: collect_analyses.then(Vec::new),
            write_failures: 0,
        }
    }

    fn record(&mut self, outcome: AnalysisOutcome) {
        let ts = self.accumulator.record(&outcome.sources);
        debug!(
            "Analysis run {} block {:?}: {} sources, TS {:.3}",
            outcome.target.run,
            outcome.target.block,
            outcome.sources.len(),
            ts
        );
        self.write_failures += outcome.write_failures;
        if let Some(analyses) = self.analyses.as_mut() {
            analyses.push(AnalysisRecord::new(&outcome, ts));
        }
    }
}

/// A simulation-and-refit campaign.
pub struct Campaign<'a, S: MapStore + ?Sized, D: DiffuseStore + ?Sized> {
    config: CampaignConfig,
    inputs: CampaignInputs,
    maps: &'a S,
    diffuse: &'a D,
}

impl<'a, S: MapStore + ?Sized, D: DiffuseStore + ?Sized> Campaign<'a, S, D> {
    /// Loads and checks every input.
    ///
    /// `maps` serves both the exposure maps and the saved products,
    /// `diffuse` the gas maps.
    pub fn new(config: CampaignConfig, maps: &'a S, diffuse: &'a D) -> Result<Self, CampaignError> {
        let inputs = CampaignInputs::load(&config, maps, diffuse)?;
        info!(
            "Campaign ready: {} maps, {} simulated sources, {} analysis sources, block {}",
            inputs.catalog_len(),
            inputs.sim_sources.len(),
            inputs.analysis_sources.len(),
            inputs.block
        );
        Ok(Self {
            config,
            inputs,
            maps,
            diffuse,
        })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn inputs(&self) -> &CampaignInputs {
        &self.inputs
    }

    /// Runs the campaign.
    ///
    /// `make_engine` builds fit engines: once per run, or once for the
    /// campaign when the engine lifetime is shared. No engine is built
    /// when analysis is skipped. All randomness is drawn from `rng`.
    pub fn run<E, F, R>(&self, mut make_engine: F, rng: &mut R) -> Result<CampaignSummary, CampaignError>
    where
        E: FitEngine,
        F: FnMut() -> E,
        R: Rng + ?Sized,
    {
        let orchestrator = FitOrchestrator::new(&self.config);
        let aggregator = BlockAggregator::new(self.inputs.block, self.diffuse, &self.config.res_matrices);
        let lifetime = self.config.engine_lifetime;
        let analysis = self.config.analysis_enabled();
        let mut progress = Progress::new(self.config.collect_analyses);

        let mut shared = if analysis && lifetime.is_shared() {
            Some(self.build_engine(&mut make_engine)?)
        } else {
            None
        };

        for run in 1..=self.config.nruns {
            progress.accumulator.begin_run(run);
            info!("Campaign loop #{}", run);

            let simulated = self
                .inputs
                .simulation
                .new_simulation_array(&self.inputs.sim_sources, rng)?;
            debug!(
                "Simulated {} maps, {} counts",
                simulated.len(),
                simulated.iter().map(SkyMap::total).sum::<f64>()
            );

            let mut fresh = None;
            let mut engine: Option<&mut E> = if !analysis {
                None
            } else if let Some(engine) = shared.as_mut() {
                if lifetime == EngineLifetime::Shared {
                    engine.reset();
                }
                Some(engine)
            } else {
                fresh = Some(self.build_engine(&mut make_engine)?);
                fresh.as_mut()
            };

            if aggregator.is_passthrough() {
                self.run_unaggregated(run, &simulated, engine.as_deref_mut(), &aggregator, &orchestrator, &mut progress)?;
            } else {
                self.run_blocks(run, &simulated, engine.as_deref_mut(), &aggregator, &orchestrator, &mut progress)?;
            }

            if let Some(engine) = engine {
                progress.write_failures +=
                    orchestrator.finish_run(engine, run, &simulated, self.inputs.catalog_len());
            }
        }

        let ts = progress.accumulator.summary();
        match &ts {
            Some(ts) => info!(
                "Performed the analysis {} times. Total TS: {:.3}, average: {:.3}",
                ts.analysis_count, ts.total_ts, ts.mean_ts
            ),
            None => info!("No analysis performed"),
        }
        if progress.write_failures > 0 {
            warn!("{} outputs could not be written", progress.write_failures);
        }

        Ok(CampaignSummary {
            runs_completed: self.config.nruns,
            blocks_per_run: aggregator.block_count(self.inputs.catalog_len()),
            state: progress.accumulator.state(),
            ts,
            write_failures: progress.write_failures,
            analyses: progress.analyses.unwrap_or_default(),
        })
    }

    fn build_engine<E, F>(&self, make_engine: &mut F) -> Result<E, CampaignError>
    where
        E: FitEngine,
        F: FnMut() -> E,
    {
        let mut engine = make_engine();
        engine.set_psf(&self.config.response)?;
        Ok(engine)
    }

    /// One analysis per sliding block.
    fn run_blocks<E: FitEngine + ?Sized>(
        &self,
        run: usize,
        simulated: &[SkyMap],
        mut engine: Option<&mut E>,
        aggregator: &BlockAggregator<'_, D>,
        orchestrator: &FitOrchestrator,
        progress: &mut Progress,
    ) -> Result<(), CampaignError> {
        let exposures = self.inputs.simulation.exposures();
        let out = &self.config.outfile;
        let save = self.config.mode.save_maps;

        if save {
            for (m, (counts, exposure)) in simulated.iter().zip(exposures).enumerate() {
                self.save_map(block_map_name(run, m, out, "cts"), counts, progress);
                self.save_map(block_map_name(run, m, out, "exp"), exposure, progress);
            }
        }

        for offset in aggregator.offsets(simulated.len()) {
            info!(
                "Summing maps {} to {} [run {}]",
                offset + 1,
                offset + aggregator.block_size(),
                run
            );
            let block = aggregator.sum_block(simulated, exposures, offset);
            let number = block.number();
            if save {
                self.save_map(sum_map_name(run, number, out, "cts"), &block.counts, progress);
                self.save_map(sum_map_name(run, number, out, "exp"), &block.exposure, progress);
            }

            let Some(engine) = engine.as_deref_mut() else {
                continue;
            };

            let diffuse = aggregator
                .resolve_diffuse(&block.exposure)
                .map_err(CampaignError::Diffuse)?;
            if save {
                self.save_map(sum_map_name(run, number, out, "gas"), &diffuse, progress);
            }

            let entry = &self.inputs.analysis_entries[offset];
            let maps = vec![AnalysisMap {
                counts: block.counts,
                exposure: block.exposure,
                diffuse,
                gal_coeff: entry.gal_coeff,
                iso_coeff: entry.iso_coeff,
            }];
            let outcome = orchestrator.analyze(
                engine,
                maps,
                &self.inputs.analysis_sources,
                AnalysisTarget::block(run, number),
            )?;
            progress.record(outcome);
        }
        Ok(())
    }

    /// One analysis over every map of the run.
    fn run_unaggregated<E: FitEngine + ?Sized>(
        &self,
        run: usize,
        simulated: &[SkyMap],
        engine: Option<&mut E>,
        aggregator: &BlockAggregator<'_, D>,
        orchestrator: &FitOrchestrator,
        progress: &mut Progress,
    ) -> Result<(), CampaignError> {
        let counts: Vec<SkyMap> = aggregator
            .blocks(simulated, self.inputs.simulation.exposures())
            .into_iter()
            .map(|block| block.counts)
            .collect();

        if self.config.mode.save_maps {
            for (m, map) in counts.iter().enumerate() {
                self.save_map(single_map_name(run, m, &self.config.outfile, "cts"), map, progress);
            }
        }

        let Some(engine) = engine else {
            return Ok(());
        };

        let maps = self
            .inputs
            .analysis
            .iter()
            .zip(counts)
            .map(|(input, counts)| AnalysisMap {
                counts,
                exposure: input.exposure.clone(),
                diffuse: input.diffuse.clone(),
                gal_coeff: input.entry.gal_coeff,
                iso_coeff: input.entry.iso_coeff,
            })
            .collect();
        let outcome = orchestrator.analyze(engine, maps, &self.inputs.analysis_sources, AnalysisTarget::run(run))?;
        progress.record(outcome);
        Ok(())
    }

    fn save_map(&self, name: String, map: &SkyMap, progress: &mut Progress) {
        let path = self.config.output_dir.join(name);
        match self.maps.write_map(&path, map) {
            Ok(()) => debug!("Saved {}", path.display()),
            Err(e) => {
                warn!("Could not save {}: {}", path.display(), e);
                progress.write_failures += 1;
            }
        }
    }
}
