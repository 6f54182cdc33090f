//! Reproducible fault injection for demos and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides, call by call, whether an injected failure happens.
pub trait FaultSource: Send + Sync + 'static {
    fn should_fail(&self) -> bool;
}

/// Independent failures with fixed probability, from a seeded generator.
#[derive(Debug)]
pub struct SeededFaults {
    rng: Mutex<StdRng>,
    probability: f64,
}

impl SeededFaults {
    /// `probability` is clamped to [0, 1]; NaN means never fail.
    pub fn new(seed: u64, probability: f64) -> Self {
        let probability = if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 1.0) };
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            probability,
        }
    }
}

impl FaultSource for SeededFaults {
    fn should_fail(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(self.probability)
    }
}

/// Cycles through a fixed pattern; `true` entries fail.
#[derive(Debug)]
pub struct ScriptedFaults {
    pattern: Vec<bool>,
    cursor: AtomicUsize,
}

impl ScriptedFaults {
    pub fn new(pattern: Vec<bool>) -> Self {
        Self {
            pattern,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `ok` successes followed by `failed` failures, repeated.
    pub fn alternating(ok: usize, failed: usize) -> Self {
        let mut pattern = vec![false; ok];
        pattern.extend(std::iter::repeat(true).take(failed));
        Self::new(pattern)
    }
}

impl FaultSource for ScriptedFaults {
    fn should_fail(&self) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.pattern[index % self.pattern.len()]
    }
}

/// Uniform delays in `[0, max)` from a seeded generator.
#[derive(Debug)]
pub struct SeededDelays {
    rng: Mutex<StdRng>,
    max: Duration,
}

impl SeededDelays {
    pub fn new(seed: u64, max: Duration) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max,
        }
    }

    pub fn next_delay(&self) -> Duration {
        let max_ms = self.max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.gen_range(0..max_ms))
    }
}
