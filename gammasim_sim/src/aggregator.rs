//! Block aggregation over a sliding window of maps.
//!
//! For a window size `B > 0` and `L` maps the aggregator produces
//! `L - B + 1` blocks at offsets `0..=L - B`; consecutive blocks overlap by
//! `B - 1` maps. With `B == 0` every map is its own block, unchanged.

use gammasim_env::{DiffuseStore, SkyMap, StoreError};
use std::ops::Range;

/// Element-wise sum of `count` simulated count maps starting at `offset`.
///
/// # Panics
/// If `count` is zero or the window runs past the end of `simulated`.
pub fn sum_maps(simulated: &[SkyMap], offset: usize, count: usize) -> SkyMap {
    reduce(simulated, offset, count, "sum_maps")
}

/// Element-wise sum of `count` exposure maps starting at `offset`.
///
/// # Panics
/// Same preconditions as [`sum_maps`].
pub fn sum_exposure(exposures: &[SkyMap], offset: usize, count: usize) -> SkyMap {
    reduce(exposures, offset, count, "sum_exposure")
}

fn reduce(maps: &[SkyMap], offset: usize, count: usize, what: &str) -> SkyMap {
    assert!(count > 0, "{}: empty window", what);
    assert!(
        offset + count <= maps.len(),
        "{}: window {}..{} exceeds {} maps",
        what,
        offset,
        offset + count,
        maps.len()
    );
    let window = &maps[offset..offset + count];
    let mut sum = window[0].clone();
    for map in &window[1..] {
        sum += map;
    }
    sum
}

/// Aggregated counts and exposure of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Index of the first map in the window
    pub offset: usize,
    pub counts: SkyMap,
    pub exposure: SkyMap,
}

impl Block {
    /// 1-based block number used in product names.
    pub fn number(&self) -> usize {
        self.offset + 1
    }
}

/// Slices a simulated map array into blocks and resolves their diffuse maps.
pub struct BlockAggregator<'a, D: DiffuseStore + ?Sized> {
    block: usize,
    diffuse: &'a D,
    matrices: &'a str,
}

impl<'a, D: DiffuseStore + ?Sized> BlockAggregator<'a, D> {
    /// Creates an aggregator for window size `block` (0 = pass-through).
    pub fn new(block: usize, diffuse: &'a D, matrices: &'a str) -> Self {
        Self {
            block,
            diffuse,
            matrices,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn is_passthrough(&self) -> bool {
        self.block == 0
    }

    /// Number of blocks for `len` maps.
    pub fn block_count(&self, len: usize) -> usize {
        match self.block {
            0 => len,
            b if b > len => 0,
            b => len - b + 1,
        }
    }

    /// Window offsets for `len` maps.
    pub fn offsets(&self, len: usize) -> Range<usize> {
        0..self.block_count(len)
    }

    /// Sums the window starting at `offset`.
    pub fn sum_block(&self, simulated: &[SkyMap], exposures: &[SkyMap], offset: usize) -> Block {
        let width = self.block.max(1);
        Block {
            offset,
            counts: sum_maps(simulated, offset, width),
            exposure: sum_exposure(exposures, offset, width),
        }
    }

    /// Every block of a run, in offset order.
    pub fn blocks(&self, simulated: &[SkyMap], exposures: &[SkyMap]) -> Vec<Block> {
        self.offsets(simulated.len())
            .map(|offset| self.sum_block(simulated, exposures, offset))
            .collect()
    }

    /// Looks up the diffuse map for a block exposure and aligns it to the
    /// exposure grid.
    pub fn resolve_diffuse(&self, exposure: &SkyMap) -> Result<SkyMap, StoreError> {
        let map = self.diffuse.diffuse_map(&exposure.band, self.matrices)?;
        Ok(map.resample_onto(&exposure.geometry))
    }
}
