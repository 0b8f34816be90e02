//! Campaign-wide test-statistic accumulation.

use gammasim_env::{FixFlag, SourceDescriptor};
use serde::{Deserialize, Serialize};

/// Progress of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CampaignState {
    /// Current 1-based run (0 before the first run)
    pub run_index: usize,

    /// Analyses performed so far
    pub analysis_count: usize,

    /// Sum of TS over every fitted source not AllFixed
    pub sum_ts: f64,
}

/// Final TS figures of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TsSummary {
    pub analysis_count: usize,
    pub total_ts: f64,
    pub mean_ts: f64,
}

/// Sole owner of the campaign state.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    state: CampaignState,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&mut self, run: usize) {
        self.state.run_index = run;
    }

    /// Records one analysis. Returns the TS it contributed.
    pub fn record(&mut self, sources: &[SourceDescriptor]) -> f64 {
        let ts: f64 = sources
            .iter()
            .filter(|s| s.fix_flag != FixFlag::AllFixed)
            .map(|s| s.ts())
            .sum();
        self.state.analysis_count += 1;
        self.state.sum_ts += ts;
        ts
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    /// Total and mean TS; `None` when no analysis was performed.
    pub fn summary(&self) -> Option<TsSummary> {
        if self.state.analysis_count == 0 {
            return None;
        }
        Some(TsSummary {
            analysis_count: self.state.analysis_count,
            total_ts: self.state.sum_ts,
            mean_ts: self.state.sum_ts / self.state.analysis_count as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitted(name: &str, flag: FixFlag, ts: f64) -> SourceDescriptor {
        let mut s = SourceDescriptor::new(name, 0.0, 0.0, 2.0, 1e-7, flag);
        s.fit.ts = ts;
        s
    }

    #[test]
    fn test_all_fixed_contributes_nothing() {
        let mut acc = ResultAccumulator::new();
        let added = acc.record(&[fitted("A", FixFlag::AllFixed, 50.0), fitted("B", FixFlag::AllFixed, 9.0)]);

        assert_eq!(added, 0.0);
        assert_eq!(acc.state().analysis_count, 1);
        assert_eq!(acc.state().sum_ts, 0.0);
    }

    #[test]
    fn test_mixed_flags() {
        let mut acc = ResultAccumulator::new();
        acc.begin_run(1);
        acc.record(&[
            fitted("A", FixFlag::Free, 16.0),
            fitted("B", FixFlag::PartiallyFixed, 4.0),
            fitted("C", FixFlag::AllFixed, 100.0),
        ]);
        acc.begin_run(2);
        acc.record(&[fitted("A", FixFlag::Free, 10.0)]);

        let summary = acc.summary().unwrap();
        assert_eq!(acc.state().run_index, 2);
        assert_eq!(summary.analysis_count, 2);
        assert_eq!(summary.total_ts, 30.0);
        assert_eq!(summary.mean_ts, 15.0);
    }

    #[test]
    fn test_no_summary_without_analyses() {
        let mut acc = ResultAccumulator::new();
        acc.begin_run(3);
        assert!(acc.summary().is_none());
    }
}
