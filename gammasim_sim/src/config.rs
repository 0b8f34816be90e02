//! Campaign configuration.

use clap::ValueEnum;
use gammasim_env::{EmissionModes, FitParams, ResponsePaths};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a campaign does with each run, as independent switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationMode {
    /// One shared log line per run instead of per-block result files
    pub concise: bool,

    /// Simulate only; no fit engine is ever built
    pub skip_analysis: bool,

    /// Refit every analysis with the first pass's output as input
    pub double_analysis: bool,

    /// Write every simulated and summed map
    pub save_maps: bool,
}

impl OperationMode {
    pub const CONCISE: u32 = 1;
    pub const SKIP_ANALYSIS: u32 = 2;
    pub const DOUBLE_ANALYSIS: u32 = 4;
    pub const SAVE_MAPS: u32 = 8;

    /// Decodes the legacy integer operation mode. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            concise: bits & Self::CONCISE != 0,
            skip_analysis: bits & Self::SKIP_ANALYSIS != 0,
            double_analysis: bits & Self::DOUBLE_ANALYSIS != 0,
            save_maps: bits & Self::SAVE_MAPS != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.concise {
            bits |= Self::CONCISE;
        }
        if self.skip_analysis {
            bits |= Self::SKIP_ANALYSIS;
        }
        if self.double_analysis {
            bits |= Self::DOUBLE_ANALYSIS;
        }
        if self.save_maps {
            bits |= Self::SAVE_MAPS;
        }
        bits
    }
}

/// How fit engines are allocated across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineLifetime {
    /// A fresh engine for every run
    #[default]
    PerRun,

    /// One engine for the campaign, reset at every run boundary
    Shared,

    /// One engine for the campaign, fit state carried across runs
    SharedPreserve,
}

impl EngineLifetime {
    pub fn is_shared(&self) -> bool {
        !matches!(self, EngineLifetime::PerRun)
    }
}

/// Everything a campaign needs to know before it starts.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignConfig {
    pub mode: OperationMode,

    /// Sliding-window size (0 = no aggregation)
    pub block: usize,

    pub nruns: usize,

    /// RNG seed (0 = system entropy)
    pub seed: u64,

    pub response: ResponsePaths,

    pub map_list_sim: PathBuf,
    pub source_list_sim: PathBuf,
    pub map_list_analysis: PathBuf,
    pub source_list_analysis: PathBuf,

    /// Base name of every output product
    pub outfile: String,

    /// Directory for saved maps and fit products
    pub output_dir: PathBuf,

    pub fit: FitParams,
    pub emission: EmissionModes,

    /// Response-matrix identifier used to key diffuse maps
    pub res_matrices: String,

    pub engine_lifetime: EngineLifetime,

    /// Add the diffuse/isotropic background to simulated counts
    pub simulate_background: bool,

    /// Keep a record of every analysis in the campaign summary
    pub collect_analyses: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::default(),
            block: 0,
            nruns: 1,
            seed: 0,
            response: ResponsePaths {
                psd: PathBuf::from("response.psd"),
                sar: PathBuf::from("response.sar"),
                edp: PathBuf::from("response.edp"),
            },
            map_list_sim: PathBuf::from("sim.maplist"),
            source_list_sim: PathBuf::from("sim.multi"),
            map_list_analysis: PathBuf::from("analysis.maplist"),
            source_list_analysis: PathBuf::from("analysis.multi"),
            outfile: "gammasim".to_string(),
            output_dir: PathBuf::from("."),
            fit: FitParams::default(),
            emission: EmissionModes::default(),
            res_matrices: "I0025".to_string(),
            engine_lifetime: EngineLifetime::PerRun,
            simulate_background: true,
            collect_analyses: false,
        }
    }
}

impl CampaignConfig {
    pub fn analysis_enabled(&self) -> bool {
        !self.mode.skip_analysis
    }
}
