//! The campaign's random stream.
//!
//! A campaign draws every random number from one `ChaCha8Rng`. It is built
//! once, before the first run, and never reseeded.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Turns the configured seed into the seed actually used.
///
/// `0` asks for a seed from system entropy. The result is always a
/// concrete value so that it can be logged and replayed.
pub fn resolve_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    loop {
        let drawn = OsRng.next_u64();
        if drawn != 0 {
            return drawn;
        }
    }
}

/// Creates the campaign RNG from a resolved seed.
pub fn campaign_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}
