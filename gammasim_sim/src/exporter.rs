//! JSON export of a campaign.
//!
//! Writes the configuration summary, every analysis and the final TS
//! figures as one JSON document for offline study of detection rates and
//! fit bias.

use crate::accumulator::TsSummary;
use crate::config::{CampaignConfig, EngineLifetime, OperationMode};
use crate::orchestrator::AnalysisOutcome;
use crate::runner::CampaignSummary;
use gammasim_env::SourceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One analysis of the campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// 1-based run index
    pub run: usize,

    /// 1-based block number, absent without aggregation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<usize>,

    pub passes: usize,

    /// TS contributed to the campaign total
    pub ts: f64,

    /// Fitted sources of the final pass
    pub sources: Vec<SourceDescriptor>,
}

impl AnalysisRecord {
    pub fn new(outcome: &AnalysisOutcome, ts: f64) -> Self {
        Self {
            run: outcome.target.run,
            block: outcome.target.block,
            passes: outcome.passes,
            ts,
            sources: outcome.sources.clone(),
        }
    }
}

/// Complete campaign export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignExport {
    /// Seed actually used
    pub seed: u64,

    pub nruns: usize,

    /// Effective block size
    pub block: usize,

    pub mode: OperationMode,
    pub engine_lifetime: EngineLifetime,

    /// All analyses, in execution order
    pub analyses: Vec<AnalysisRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TsSummary>,

    pub write_failures: usize,
}

impl CampaignExport {
    /// Creates an empty export for a campaign.
    pub fn new(config: &CampaignConfig, seed: u64, block: usize) -> Self {
        Self {
            seed,
            nruns: config.nruns,
            block,
            mode: config.mode,
            engine_lifetime: config.engine_lifetime,
            analyses: Vec::new(),
            summary: None,
            write_failures: 0,
        }
    }

    /// Adds an analysis.
    pub fn add_analysis(&mut self, record: AnalysisRecord) {
        self.analyses.push(record);
    }

    /// Copies the results of a finished campaign.
    pub fn finalize(&mut self, summary: &CampaignSummary) {
        for record in &summary.analyses {
            self.add_analysis(record.clone());
        }
        self.summary = summary.ts;
        self.write_failures = summary.write_failures;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
