//! Seedable randomness for scheduling decisions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the scheduler's random choices.
///
/// Kept behind a trait so tests can script exact decisions.
pub trait RandomSource {
    /// Uniform index in `0..len`. `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize;
    /// Uniform integer in `low..=high`.
    fn range_inclusive(&mut self, low: u32, high: u32) -> u32;
    /// `true` with the given probability (clamped to `0.0..=1.0`).
    fn chance(&mut self, probability: f64) -> bool;
}

/// [`RandomSource`] backed by `StdRng`.
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    /// Reproducible sequence for a fixed seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded from the operating system.
    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Uses `seed` when given, OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_os(),
        }
    }
}

impl RandomSource for SeededRandom {
    fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        self.rng.random_range(0..len)
    }

    fn range_inclusive(&mut self, low: u32, high: u32) -> u32 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }

    fn chance(&mut self, probability: f64) -> bool {
        if probability.is_nan() {
            return false;
        }
        self.rng.random_bool(probability.clamp(0.0, 1.0))
    }
}
