//! Campaign inputs, loaded and checked once before the first run.

use crate::config::CampaignConfig;
use crate::runner::CampaignError;
use crate::simulation::SimulationEngine;
use gammasim_core::{MapCatalog, MapEntry, ResponseTables, SourceCatalog};
use gammasim_env::{DiffuseStore, MapStore, SkyMap, SourceDescriptor};
use tracing::{debug, warn};

/// Exposure and diffuse map of one analysis catalog entry.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub entry: MapEntry,
    pub exposure: SkyMap,
    pub diffuse: SkyMap,
}

/// Everything a campaign reads from disk.
#[derive(Debug, Clone)]
pub struct CampaignInputs {
    pub simulation: SimulationEngine,
    pub sim_sources: Vec<SourceDescriptor>,

    /// Empty when analysis is skipped
    pub analysis_sources: Vec<SourceDescriptor>,

    /// Analysis catalog entries; block `j` takes its coefficients from entry `j`
    pub analysis_entries: Vec<MapEntry>,

    /// Per-entry analysis maps, loaded only without aggregation
    pub analysis: Vec<AnalysisInput>,

    /// Block size after clamping to the catalog length
    pub block: usize,
}

impl CampaignInputs {
    /// Reads catalogs, response tables, exposures and diffuse maps.
    ///
    /// # Errors
    /// * `CampaignError::Config` - confidence level outside (0, 1);
    ///   unreadable or malformed catalog, response or exposure map; map lists
    ///   of incompatible lengths or grids
    /// * `CampaignError::Diffuse` - a required diffuse map is missing
    pub fn load<S, D>(config: &CampaignConfig, maps: &S, diffuse: &D) -> Result<Self, CampaignError>
    where
        S: MapStore + ?Sized,
        D: DiffuseStore + ?Sized,
    {
        check_confidence_level("upper-limit", config.fit.upper_limit_cl)?;
        check_confidence_level("location", config.fit.location_cl)?;

        let sim_catalog = MapCatalog::read(&config.map_list_sim)
            .map_err(|e| CampaignError::config(format!("simulation map list: {}", e)))?;
        let analysis_catalog = if config.analysis_enabled() {
            Some(
                MapCatalog::read(&config.map_list_analysis)
                    .map_err(|e| CampaignError::config(format!("analysis map list: {}", e)))?,
            )
        } else {
            None
        };

        let len = sim_catalog.len();
        let mut block = config.block;
        if block > len {
            warn!("Block size {} exceeds the {} simulated maps, using {}", block, len, len);
            block = len;
        }

        if let Some(analysis) = &analysis_catalog {
            if block > 0 && analysis.len() != len {
                return Err(CampaignError::config(format!(
                    "the two map lists must have the same number of rows ({} simulated, {} analysed)",
                    len,
                    analysis.len()
                )));
            }
            if block == 0 && analysis.len() > len {
                return Err(CampaignError::config(format!(
                    "the analysis map list has {} rows, more than the {} simulated maps",
                    analysis.len(),
                    len
                )));
            }
        }

        let response = ResponseTables::load(&config.response)
            .map_err(|e| CampaignError::config(format!("response tables: {}", e)))?;

        let mut simulation = SimulationEngine::new(response).with_background(config.simulate_background);
        for entry in sim_catalog.entries() {
            let exposure = load_exposure(maps, entry)?;
            if block > 0 {
                if let Some(first) = simulation.exposures().first() {
                    if !first.compatible(&exposure) {
                        return Err(CampaignError::config(format!(
                            "exposure {} is not on the grid of the first exposure",
                            entry.exposure.display()
                        )));
                    }
                }
            }
            let gas = if config.simulate_background && entry.has_background() {
                Some(load_diffuse(diffuse, &exposure, &config.res_matrices)?)
            } else {
                None
            };
            simulation.add_map(entry.clone(), exposure, gas);
        }
        debug!("Loaded {} simulation maps", simulation.len());

        let sim_sources = SourceCatalog::read(&config.source_list_sim)
            .map_err(|e| CampaignError::config(format!("simulation source list: {}", e)))?
            .into_sources();

        let mut analysis_sources = Vec::new();
        let mut analysis_entries = Vec::new();
        let mut analysis = Vec::new();
        if let Some(catalog) = analysis_catalog {
            analysis_sources = SourceCatalog::read(&config.source_list_analysis)
                .map_err(|e| CampaignError::config(format!("analysis source list: {}", e)))?
                .into_sources();

            if block == 0 {
                for (m, entry) in catalog.entries().iter().enumerate() {
                    let exposure = load_exposure(maps, entry)?;
                    if !exposure.compatible(&simulation.exposures()[m]) {
                        return Err(CampaignError::config(format!(
                            "analysis exposure {} is not on the grid of simulated map {}",
                            entry.exposure.display(),
                            m + 1
                        )));
                    }
                    let gas = load_diffuse(diffuse, &exposure, &config.res_matrices)?;
                    analysis.push(AnalysisInput {
                        entry: entry.clone(),
                        exposure,
                        diffuse: gas,
                    });
                }
            }
            analysis_entries = catalog.entries().to_vec();
        }

        Ok(Self {
            simulation,
            sim_sources,
            analysis_sources,
            analysis_entries,
            analysis,
            block,
        })
    }

    /// Length of the simulation map catalog.
    pub fn catalog_len(&self) -> usize {
        self.simulation.len()
    }
}

/// Reads an exposure map and stamps the catalog's band and time on it.
fn check_confidence_level(name: &str, cl: f64) -> Result<(), CampaignError> {
    if cl > 0.0 && cl < 1.0 {
        Ok(())
    } else {
        Err(CampaignError::config(format!(
            "{} confidence level must lie strictly between 0 and 1, got {}",
            name, cl
        )))
    }
}

fn load_exposure<S: MapStore + ?Sized>(maps: &S, entry: &MapEntry) -> Result<SkyMap, CampaignError> {
    let mut exposure = maps
        .read_map(&entry.exposure)
        .map_err(|e| CampaignError::config(format!("exposure map: {}", e)))?;
    exposure.band = entry.band;
    exposure.time = entry.time;
    Ok(exposure)
}

fn load_diffuse<D: DiffuseStore + ?Sized>(
    diffuse: &D,
    exposure: &SkyMap,
    matrices: &str,
) -> Result<SkyMap, CampaignError> {
    let map = diffuse
        .diffuse_map(&exposure.band, matrices)
        .map_err(CampaignError::Diffuse)?;
    Ok(map.resample_onto(&exposure.geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationMode;
    use crate::testing::{all_fixed_source, Fixture};

    #[test]
    fn test_load_fixture() {
        let fx = Fixture::new("inputs_load", 3, &[all_fixed_source()]);
        let inputs = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap();

        assert_eq!(inputs.catalog_len(), 3);
        assert_eq!(inputs.sim_sources.len(), 1);
        assert_eq!(inputs.analysis.len(), 3);
        assert_eq!(inputs.simulation.exposures()[1].time.tstart, 100.0);
    }

    #[test]
    fn test_block_clamped_to_catalog_length() {
        let mut fx = Fixture::new("inputs_clamp", 3, &[]);
        fx.config.block = 7;
        let inputs = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap();
        assert_eq!(inputs.block, 3);
    }

    #[test]
    fn test_mismatched_lengths_with_blocks() {
        let mut fx = Fixture::new("inputs_mismatch", 4, &[]).with_analysis_maps(3);
        fx.config.block = 2;
        let err = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap_err();
        assert!(matches!(err, CampaignError::Config(_)));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn test_mismatched_lengths_ignored_when_skipping_analysis() {
        let mut fx = Fixture::new("inputs_skip", 4, &[]).with_analysis_maps(3);
        fx.config.block = 2;
        fx.config.mode = OperationMode {
            skip_analysis: true,
            ..Default::default()
        };
        let inputs = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap();
        assert!(inputs.analysis_entries.is_empty());
    }

    #[test]
    fn test_unaggregated_analysis_list_may_be_shorter() {
        let fx = Fixture::new("inputs_short", 4, &[]).with_analysis_maps(2);
        let inputs = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap();
        assert_eq!(inputs.analysis.len(), 2);

        let fx = Fixture::new("inputs_long", 2, &[]).with_analysis_maps(3);
        assert!(CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).is_err());
    }

    #[test]
    fn test_missing_map_list_is_config_error() {
        let mut fx = Fixture::new("inputs_missing", 2, &[]);
        fx.config.map_list_sim = fx.dir.path().join("nope.maplist");
        let err = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap_err();
        assert!(matches!(err, CampaignError::Config(_)));
    }

    #[test]
    fn test_malformed_source_list_is_config_error() {
        let mut fx = Fixture::new("inputs_badsrc", 2, &[]);
        fx.config.source_list_sim = fx.file("bad.multi", "1e-7 30 10 2.0\n");
        let err = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap_err();
        assert!(err.to_string().contains("Line 1"));
    }

    #[test]
    fn test_confidence_levels_outside_unit_interval_are_config_errors() {
        for (ul, loc) in [(1.0, 0.95), (0.0, 0.95), (0.95, 1.5), (0.95, -0.1), (f64::NAN, 0.95)] {
            let mut fx = Fixture::new("inputs_cl", 2, &[]);
            fx.config.fit.upper_limit_cl = ul;
            fx.config.fit.location_cl = loc;
            let err = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap_err();
            assert!(err.to_string().contains("confidence level"), "{}", err);
            assert_eq!(err.exit_code(), 78);
        }

        let mut fx = Fixture::new("inputs_cl_ok", 2, &[]);
        fx.config.fit.upper_limit_cl = 0.99;
        fx.config.fit.location_cl = 0.68;
        assert!(CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).is_ok());
    }

    #[test]
    fn test_missing_diffuse_is_store_error() {
        let mut fx = Fixture::new("inputs_nogas", 2, &[]);
        fx.config.res_matrices = "H0025".to_string();
        let err = CampaignInputs::load(&fx.config, &fx.maps, &fx.diffuse).unwrap_err();
        assert!(matches!(err, CampaignError::Diffuse(_)));
        assert_eq!(err.exit_code(), 66);
    }
}
