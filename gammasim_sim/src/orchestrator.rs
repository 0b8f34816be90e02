//! Fit orchestration - one or two fit passes per analysis.

use crate::config::CampaignConfig;
use crate::naming::result_base;
use gammasim_env::{AnalysisMap, EmissionModes, EngineError, FitEngine, FitParams, SkyMap, SourceDescriptor};
use tracing::{debug, warn};

/// Which analysis of the campaign is being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisTarget {
    /// 1-based run index
    pub run: usize,

    /// 1-based block number, `None` without aggregation
    pub block: Option<usize>,
}

impl AnalysisTarget {
    pub fn block(run: usize, block: usize) -> Self {
        Self {
            run,
            block: Some(block),
        }
    }

    pub fn run(run: usize) -> Self {
        Self { run, block: None }
    }

    pub fn file_base(&self, outfile: &str) -> String {
        result_base(self.run, self.block, outfile)
    }
}

/// Result of one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub target: AnalysisTarget,

    /// Fitted sources of the final pass
    pub sources: Vec<SourceDescriptor>,

    /// Fit passes performed (1 or 2)
    pub passes: usize,

    /// Result files that could not be written
    pub write_failures: usize,
}

/// Drives the fit engine through each analysis.
#[derive(Debug, Clone)]
pub struct FitOrchestrator {
    params: FitParams,
    emission: EmissionModes,
    double_analysis: bool,
    concise: bool,
    outfile: String,
}

impl FitOrchestrator {
    pub fn new(config: &CampaignConfig) -> Self {
        Self {
            params: config.fit,
            emission: config.emission,
            double_analysis: config.mode.double_analysis,
            concise: config.mode.concise,
            outfile: config.outfile.clone(),
        }
    }

    /// Fits `sources` against `maps`.
    ///
    /// With double analysis the sources returned by the first pass are fed
    /// back into a second pass. Outside concise mode the result report and
    /// source list are written under the target's file base; write
    /// failures are logged and counted.
    ///
    /// # Errors
    /// Any fit failure of either pass, unchanged.
    pub fn analyze<E: FitEngine + ?Sized>(
        &self,
        engine: &mut E,
        maps: Vec<AnalysisMap>,
        sources: &[SourceDescriptor],
        target: AnalysisTarget,
    ) -> Result<AnalysisOutcome, EngineError> {
        engine.set_maps(maps, self.emission);
        engine.do_fit(sources, &self.params)?;
        let mut passes = 1;

        if self.double_analysis {
            let refined = engine.fit_data();
            debug!("Second fit pass with {} sources [run {}]", refined.len(), target.run);
            engine.do_fit(&refined, &self.params)?;
            passes = 2;
        }

        let mut write_failures = 0;
        if !self.concise {
            let base = target.file_base(&self.outfile);
            if let Err(e) = engine.write(&base) {
                warn!("Could not write fit report {}: {}", base, e);
                write_failures += 1;
            }
            if let Err(e) = engine.write_sources(&base) {
                warn!("Could not write source list {}: {}", base, e);
                write_failures += 1;
            }
        }

        Ok(AnalysisOutcome {
            target,
            sources: engine.fit_data(),
            passes,
            write_failures,
        })
    }

    /// Closes a run: in concise mode, appends the run's line to the shared
    /// log. Returns the number of failed writes.
    pub fn finish_run<E: FitEngine + ?Sized>(
        &self,
        engine: &mut E,
        run: usize,
        simulated: &[SkyMap],
        catalog_len: usize,
    ) -> usize {
        if !self.concise {
            return 0;
        }
        match engine.log_sources(&self.outfile, run, simulated, catalog_len) {
            Ok(()) => 0,
            Err(e) => {
                warn!("Could not append run {} to the concise log: {}", run, e);
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationMode;
    use crate::testing::{analysis_maps, EngineScript, RecordingFitEngine};
    use gammasim_env::FixFlag;

    fn sources() -> Vec<SourceDescriptor> {
        vec![
            SourceDescriptor::new("BRIGHT", 30.0, 10.0, 2.0, 1e-6, FixFlag::Free),
            SourceDescriptor::new("WEAK", 31.0, 10.0, 2.0, 1e-8, FixFlag::Free),
        ]
    }

    fn orchestrator(mode: OperationMode) -> FitOrchestrator {
        FitOrchestrator::new(&CampaignConfig {
            mode,
            outfile: "out".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_single_pass_writes_results() {
        let script = EngineScript::default();
        let mut engine = RecordingFitEngine::new(script.clone());
        let outcome = orchestrator(OperationMode::default())
            .analyze(&mut engine, analysis_maps(1), &sources(), AnalysisTarget::block(1, 2))
            .unwrap();

        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.write_failures, 0);
        let log = script.log();
        assert_eq!(log.fit_inputs.len(), 1);
        assert_eq!(log.reports, vec!["0000000001_002_out".to_string()]);
        assert_eq!(log.source_lists, vec!["0000000001_002_out".to_string()]);
    }

    #[test]
    fn test_double_analysis_feeds_first_pass_output() {
        let script = EngineScript::default().demote("WEAK");
        let mut engine = RecordingFitEngine::new(script.clone());
        let mode = OperationMode {
            double_analysis: true,
            ..Default::default()
        };
        let outcome = orchestrator(mode)
            .analyze(&mut engine, analysis_maps(1), &sources(), AnalysisTarget::run(1))
            .unwrap();

        assert_eq!(outcome.passes, 2);
        let log = script.log();
        assert_eq!(log.fit_inputs.len(), 2);
        assert_eq!(log.fit_inputs[0], sources());
        assert_eq!(log.fit_inputs[1][1].fix_flag, FixFlag::AllFixed);
        assert_eq!(log.fit_inputs[1][0].fix_flag, FixFlag::Free);
    }

    #[test]
    fn test_concise_mode_writes_no_per_analysis_files() {
        let script = EngineScript::default();
        let mut engine = RecordingFitEngine::new(script.clone());
        let mode = OperationMode {
            concise: true,
            ..Default::default()
        };
        let orch = orchestrator(mode);
        orch.analyze(&mut engine, analysis_maps(1), &sources(), AnalysisTarget::block(1, 1))
            .unwrap();
        assert_eq!(orch.finish_run(&mut engine, 1, &[], 0), 0);

        let log = script.log();
        assert!(log.reports.is_empty());
        assert_eq!(log.concise_runs, vec![1]);
    }

    #[test]
    fn test_fit_failure_propagates_status() {
        let script = EngineScript::default().fail_fit(EngineError::geometry("radius 40 exceeds map"));
        let mut engine = RecordingFitEngine::new(script);
        let err = orchestrator(OperationMode::default())
            .analyze(&mut engine, analysis_maps(1), &sources(), AnalysisTarget::run(1))
            .unwrap_err();
        assert_eq!(err.status(), 65);
    }

    #[test]
    fn test_write_failures_are_counted() {
        let script = EngineScript::default().fail_writes();
        let mut engine = RecordingFitEngine::new(script);
        let outcome = orchestrator(OperationMode::default())
            .analyze(&mut engine, analysis_maps(1), &sources(), AnalysisTarget::run(1))
            .unwrap();
        assert_eq!(outcome.write_failures, 2);
    }
}
