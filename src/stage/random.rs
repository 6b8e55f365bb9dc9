//! Seeds and per-stage random state
//!
//! The experiment root generator is seeded once; every registered stage draws
//! its own seed from it at registration time. Given the same root seed and the
//! same registration order, every stage seed is reproducible.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Range every experiment and stage seed is drawn from.
pub const SEED_RANGE: Range<u64> = 0..1_000_000;

/// Root generator for an experiment.
#[must_use]
pub fn root_generator(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Draw the next stage seed from a parent generator.
pub fn derive_seed(parent: &mut StdRng) -> u64 {
    parent.gen_range(SEED_RANGE)
}

/// Draw a seed from an unseeded system generator.
#[must_use]
pub fn unseeded() -> u64 {
    rand::thread_rng().gen_range(SEED_RANGE)
}

/// Deterministic generator private to one stage.
///
/// Clones share the same underlying generator, so the state advances across
/// calls of the stage.
#[derive(Clone)]
pub struct RandomState {
    seed: u64,
    rng: Arc<Mutex<StdRng>>,
}

impl RandomState {
    /// Generator seeded with `seed`.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Seed this generator started from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Run `f` with exclusive access to the generator.
    pub fn with<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RngCore for RandomState {
    fn next_u32(&mut self) -> u32 {
        self.lock().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.lock().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.lock().fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.lock().try_fill_bytes(dest)
    }
}

impl fmt::Debug for RandomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomState").field("seed", &self.seed).finish()
    }
}
