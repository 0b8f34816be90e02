//! Candidate source grids.
//!
//! Tiles a circular region of a counts map with zero-flux trial sources,
//! one every `bin_step` pixels, for iterative source searches.

use crate::sky::angular_distance_deg;
use gammasim_env::{FixFlag, MapGeometry, SourceDescriptor};

/// First candidate name is `10001`.
const NAME_OFFSET: usize = 10000;

/// Parameters of a candidate grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridParams {
    /// Region centre (galactic, degrees)
    pub center_l: f64,
    pub center_b: f64,

    /// Extraction radius (degrees)
    pub radius_deg: f64,

    /// Pixel stride between candidates (0 is treated as 1)
    pub bin_step: usize,

    /// Spectral index assigned to every candidate
    pub index: f64,

    pub fix_flag: FixFlag,
    pub min_sqrt_ts: f64,
    pub location_limit: f64,
}

/// Generates one candidate for every `bin_step`-th pixel whose centre lies
/// strictly within the extraction radius, scanning rows then columns.
pub fn grid_sources(geometry: &MapGeometry, params: &GridParams) -> Vec<SourceDescriptor> {
    let step = params.bin_step.max(1);
    let mut sources = Vec::new();
    for row in (0..geometry.rows).step_by(step) {
        for col in (0..geometry.cols).step_by(step) {
            let (l, b) = geometry.pixel_center(row, col);
            if angular_distance_deg(l, b, params.center_l, params.center_b) >= params.radius_deg {
                continue;
            }
            let name = format!("{:05}", NAME_OFFSET + sources.len() + 1);
            let mut source = SourceDescriptor::new(&name, l, b, params.index, 0.0, params.fix_flag);
            source.min_sqrt_ts = params.min_sqrt_ts;
            source.location_limit = params.location_limit;
            sources.push(source);
        }
    }
    sources
}
