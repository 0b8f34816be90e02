//! gammasim Monte-Carlo Campaign Driver
//!
//! This crate runs simulation-and-refit campaigns: it draws synthetic
//! photon-count maps from a known source catalog, aggregates them over
//! sliding time windows, fits a multi-source model to every aggregate and
//! accumulates detection statistics across many repeated runs.
//!
//! # Core Principle: One Seeded Stream
//!
//! All randomness comes from a single `ChaCha8Rng` created at campaign
//! start and passed down by `&mut`. Runs execute strictly in sequence, so
//! run `k` always consumes the draws that follow runs `1..k`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Campaign                            │
//! │   catalogs + response + exposures (loaded once, checked)    │
//! │                                                             │
//! │   for run in 1..=nruns:                                     │
//! │  ┌──────────────────┐   ┌─────────────────┐                 │
//! │  │ SimulationEngine │──►│ BlockAggregator │  sliding window │
//! │  │  (Poisson draws) │   │ sum + diffuse   │  L-B+1 blocks   │
//! │  └──────────────────┘   └────────┬────────┘                 │
//! │                                  ▼                          │
//! │                        ┌──────────────────┐                 │
//! │                        │ FitOrchestrator  │──► FitEngine    │
//! │                        │ 1 or 2 passes    │                 │
//! │                        └────────┬─────────┘                 │
//! │                                 ▼                           │
//! │                        ┌──────────────────┐                 │
//! │                        │ResultAccumulator │  ΣTS, count     │
//! │                        └──────────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gammasim_sim::{campaign_rng, Campaign, CampaignConfig};
//! use gammasim_core::LikelihoodFitEngine;
//!
//! let config = CampaignConfig { nruns: 100, block: 2, ..Default::default() };
//! let campaign = Campaign::new(config, &maps, &diffuse)?;
//! let mut rng = campaign_rng(42);
//! let summary = campaign.run(|| LikelihoodFitEngine::new("out"), &mut rng)?;
//! ```

mod accumulator;
mod aggregator;
mod config;
mod exporter;
mod inputs;
mod naming;
mod orchestrator;
mod rng;
mod runner;
mod simulation;
mod store;

#[cfg(test)]
mod testing;

pub use accumulator::{CampaignState, ResultAccumulator, TsSummary};
pub use aggregator::{sum_exposure, sum_maps, Block, BlockAggregator};
pub use config::{CampaignConfig, EngineLifetime, OperationMode};
pub use exporter::{AnalysisRecord, CampaignExport};
pub use inputs::{AnalysisInput, CampaignInputs};
pub use orchestrator::{AnalysisOutcome, AnalysisTarget, FitOrchestrator};
pub use rng::{campaign_rng, resolve_seed};
pub use runner::{Campaign, CampaignError, CampaignSummary, EXIT_CONFIG, EXIT_SIMULATION};
pub use simulation::{SimulatedMapArray, SimulationEngine, SimulationError};
pub use store::{MemoryDiffuseStore, MemoryMapStore};
