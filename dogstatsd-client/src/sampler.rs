//! Probabilistic sampling of metric submissions.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Decides whether a metric with the given sample rate should be emitted.
///
/// Rates at or above 1.0 are always sampled without touching the random source. Rates at or below 0.0 (or NaN) are
/// never sampled. Otherwise, a single uniform value in `[0, 1)` is drawn from `rng`, with the lock held only for the
/// draw itself, and the metric is sampled if the draw is below `rate`.
pub fn should_sample<R>(rate: f64, rng: &Mutex<R>) -> bool
where
    R: Rng,
{
    if rate >= 1.0 {
        return true;
    }

    if rate.is_nan() || rate <= 0.0 {
        return false;
    }

    let draw: f64 = rng.lock().random();
    draw < rate
}

/// A thread-safe sampler.
///
/// Each `Sampler` owns its own [Xoshiro256**][xoshiro256starstar] generator behind a mutex, so it can be shared by
/// many threads, or given to a single handler to avoid contention entirely.
///
/// [xoshiro256starstar]: https://prng.di.unimi.it
pub struct Sampler {
    rng: Mutex<Xoshiro256StarStar>,
}

impl Sampler {
    /// Creates a new `Sampler` seeded from the thread-local generator.
    pub fn new() -> Self {
        Self { rng: Mutex::new(Xoshiro256StarStar::from_rng(&mut rand::rng())) }
    }

    /// Creates a new `Sampler` with a fixed seed.
    ///
    /// Two samplers created with the same seed make identical decisions for identical sequences of rates.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(Xoshiro256StarStar::seed_from_u64(seed)) }
    }

    /// Returns `true` if a metric with the given sample rate should be emitted.
    pub fn should_sample(&self, rate: f64) -> bool {
        should_sample(rate, &self.rng)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
