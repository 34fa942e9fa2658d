//! Challenge workloads.
//!
//! Each challenge allocates a batch of objects per epoch, gives every object
//! a random lifetime measured in epochs and frees it when that expires. Only
//! the size distribution differs between challenges.

use segmalloc_core::{MAX_REQUEST, MIN_REQUEST};
use serde::Serialize;

use crate::error::HarnessError;

/// Deterministic xorshift64* generator.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        // All-zero state is a fixed point.
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = (high_inclusive - low) as u64 + 1;
        low + (self.next_u64() % span) as usize
    }
}

/// How request sizes are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeDistribution {
    Fixed { size: usize },
    /// Uniform over multiples of 8 in `[min, max]`.
    Uniform { min: usize, max: usize },
    /// Log-uniform over `[min, max]`: every power-of-two band is equally
    /// likely, so small sizes dominate by count.
    Skewed { min: usize, max: usize },
}

impl SizeDistribution {
    pub fn sample(&self, rng: &mut XorShift64) -> usize {
        match *self {
            Self::Fixed { size } => size,
            Self::Uniform { min, max } => 8 * rng.gen_range(min / 8, max / 8),
            Self::Skewed { min, max } => {
                let low_bits = usize::BITS - 1 - min.leading_zeros();
                let high_bits = usize::BITS - 1 - max.leading_zeros();
                let band = rng.gen_range(low_bits as usize, high_bits as usize);
                let lo = (1usize << band).max(min);
                let hi = ((1usize << (band + 1)) - 1).min(max);
                let size = rng.gen_range(lo, hi) & !7;
                size.clamp(MIN_REQUEST.max(min), max)
            }
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        match *self {
            Self::Fixed { size } => size,
            Self::Uniform { max, .. } | Self::Skewed { max, .. } => max,
        }
    }
}

/// One challenge of the malloc challenge suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChallengeSpec {
    pub id: u8,
    pub name: &'static str,
    pub sizes: SizeDistribution,
    pub epochs: usize,
    pub allocations_per_epoch: usize,
    /// Objects live between 1 and this many epochs.
    pub max_lifetime_epochs: usize,
}

impl ChallengeSpec {
    const SUITE: [ChallengeSpec; 5] = [
        ChallengeSpec {
            id: 1,
            name: "fixed_128",
            sizes: SizeDistribution::Fixed { size: 128 },
            epochs: 1_000,
            allocations_per_epoch: 128,
            max_lifetime_epochs: 32,
        },
        ChallengeSpec {
            id: 2,
            name: "fixed_16",
            sizes: SizeDistribution::Fixed { size: 16 },
            epochs: 1_000,
            allocations_per_epoch: 128,
            max_lifetime_epochs: 32,
        },
        ChallengeSpec {
            id: 3,
            name: "random_16_128",
            sizes: SizeDistribution::Uniform { min: 16, max: 128 },
            epochs: 1_000,
            allocations_per_epoch: 128,
            max_lifetime_epochs: 32,
        },
        ChallengeSpec {
            id: 4,
            name: "random_256_4000",
            sizes: SizeDistribution::Uniform {
                min: 256,
                max: MAX_REQUEST,
            },
            epochs: 500,
            allocations_per_epoch: 32,
            max_lifetime_epochs: 32,
        },
        ChallengeSpec {
            id: 5,
            name: "skewed_8_4000",
            sizes: SizeDistribution::Skewed {
                min: MIN_REQUEST,
                max: MAX_REQUEST,
            },
            epochs: 500,
            allocations_per_epoch: 64,
            max_lifetime_epochs: 32,
        },
    ];

    /// The full suite, in challenge order.
    #[must_use]
    pub fn all() -> [ChallengeSpec; 5] {
        Self::SUITE
    }

    #[must_use]
    pub fn by_id(id: u8) -> Option<ChallengeSpec> {
        Self::SUITE.iter().copied().find(|spec| spec.id == id)
    }

    /// Looks a challenge up by number (`3`) or name (`random_16_128`).
    pub fn parse(raw: &str) -> Result<ChallengeSpec, HarnessError> {
        let raw = raw.trim();
        raw.parse::<u8>()
            .ok()
            .and_then(Self::by_id)
            .or_else(|| Self::SUITE.iter().copied().find(|spec| spec.name == raw))
            .ok_or_else(|| HarnessError::UnknownChallenge(raw.to_string()))
    }

    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }
}
