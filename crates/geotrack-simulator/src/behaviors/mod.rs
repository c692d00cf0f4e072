//! Composite behaviors built from consecutive route legs.

use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub mod dispatch;
mod leg;
pub mod random_route;

pub use dispatch::{DispatchOptions, DispatchSimulator};
pub use random_route::{RandomRouteOptions, RandomRouteSimulator};

/// Half-open range of whole seconds, `[min_secs, max_secs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Pick a delay. A range that is empty yields `min_secs`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let secs = if self.max_secs > self.min_secs {
            rng.gen_range(self.min_secs..self.max_secs)
        } else {
            self.min_secs
        };
        Duration::from_secs(secs)
    }
}

impl From<(u64, u64)> for DelayRange {
    fn from((min_secs, max_secs): (u64, u64)) -> Self {
        Self::new(min_secs, max_secs)
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
