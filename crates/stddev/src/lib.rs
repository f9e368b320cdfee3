//! # Stddev - benchmark payload
//!
//! Times two standard deviation routines over seeded uniform samples of
//! increasing size and returns the timings as a `2 x N` `f64` [`Dataset`]:
//!
//! ```text
//! row 0: two-pass    (mean first, then squared deviations)
//! row 1: single-pass (sum and sum of squares in one sweep)
//! ```
//!
//! Column `i` is the total wall time in seconds of `repeats` evaluations on a
//! sample of `sizes[i]` values. The sample values come from a `StdRng`
//! seeded with the caller's seed, so two runs with the same seed time the
//! same data.

use dataset::{Dataset, DatasetError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::time::Instant;
use tracing::debug;

/// What to time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchParams {
    /// Sample sizes, one result column each.
    pub sizes: Vec<usize>,
    /// Evaluations per size and routine.
    pub repeats: u32,
}

impl Default for BenchParams {
    /// Sizes `1000, 2000, ..., 19000`, 1000 evaluations each.
    fn default() -> Self {
        Self {
            sizes: (1000..20_000).step_by(1000).collect(),
            repeats: 1000,
        }
    }
}

impl BenchParams {
    pub fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    /// Shape of the dataset [`benchmark`] returns for these params.
    pub fn shape(&self) -> Vec<u64> {
        vec![2, self.sizes.len() as u64]
    }
}

/// Population standard deviation, mean computed first.
pub fn two_pass(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}

/// Population standard deviation from the sum and sum of squares.
///
/// Less stable than [`two_pass`] for large means; clamped at zero so
/// rounding never yields `NaN`.
pub fn single_pass(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let (sum, squares) = values
        .iter()
        .fold((0.0, 0.0), |(s, q), v| (s + v, q + v * v));
    let mean = sum / n;
    (squares / n - mean * mean).max(0.0).sqrt()
}

/// Runs the benchmark. See the crate docs for the layout of the result.
pub fn benchmark(params: &BenchParams, seed: u64) -> Result<Dataset, DatasetError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = params.sizes.len();
    let mut timings = vec![0.0f64; 2 * cols];

    for (col, &size) in params.sizes.iter().enumerate() {
        let sample: Vec<f64> = (0..size).map(|_| rng.gen::<f64>()).collect();
        timings[col] = time(params.repeats, || two_pass(black_box(&sample)));
        timings[cols + col] = time(params.repeats, || single_pass(black_box(&sample)));
        debug!(size, two_pass = timings[col], single_pass = timings[cols + col], "timed");
    }

    Dataset::new(params.shape(), &timings)
}

/// Seconds spent running `f` `repeats` times.
fn time<F: FnMut() -> f64>(repeats: u32, mut f: F) -> f64 {
    let start = Instant::now();
    for _ in 0..repeats {
        black_box(f());
    }
    start.elapsed().as_secs_f64()
}
