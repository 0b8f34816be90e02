//! Output product names.
//!
//! Run numbers are 1-based and padded to ten digits, block and map numbers
//! to three.

/// Simulated map `map` (0-based) of a run in block mode.
pub fn block_map_name(run: usize, map: usize, outfile: &str, ext: &str) -> String {
    format!("{:010}_BLOCK{:03}_{}.{}", run, map, outfile, ext)
}

/// Summed map of block `block` (1-based).
pub fn sum_map_name(run: usize, block: usize, outfile: &str, ext: &str) -> String {
    format!("{:010}_SUM{:03}_{}.{}", run, block, outfile, ext)
}

/// Simulated map `map` (0-based) of a run without aggregation.
pub fn single_map_name(run: usize, map: usize, outfile: &str, ext: &str) -> String {
    format!("{:010}_{:03}_{}.{}", run, map + 1, outfile, ext)
}

/// Result file base of one analysis; `block` is 1-based.
pub fn result_base(run: usize, block: Option<usize>, outfile: &str) -> String {
    match block {
        Some(block) => format!("{:010}_{:03}_{}", run, block, outfile),
        None => format!("{:010}_{}", run, outfile),
    }
}
