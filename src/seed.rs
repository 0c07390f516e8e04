//! # Seed Distribution
//!
//! The `SeedSource` trait supplies random seeds to remote evaluation clients.
//! It is injected into the [`crate::broker::Broker`] at construction, so the
//! network `getSeed` handshake is a plain call against an explicit dependency
//! rather than a hidden process-wide random factory.
//!
//! ## Example
//!
//! ```rust
//! use evobroker::seed::{SeedSource, SequentialSeed};
//!
//! let seeds = SequentialSeed::new(42);
//! assert_eq!(seeds.next_seed(), 42);
//! assert_eq!(seeds.next_seed(), 43);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// A source of seeds handed to evaluation clients at startup.
///
/// Each call produces the seed for one client's local random engine.
/// Implementations must be safe to call from concurrent server threads.
pub trait SeedSource: Send + Sync {
    /// Produces the next seed.
    fn next_seed(&self) -> u64;
}

/// Seeds drawn from system entropy. The default source.
#[derive(Debug, Default)]
pub struct EntropySeed;

impl SeedSource for EntropySeed {
    fn next_seed(&self) -> u64 {
        rand::thread_rng().gen()
    }
}

/// Deterministic seeds counting up from a fixed base.
///
/// Gives every client a distinct seed while keeping whole runs reproducible,
/// which is what tests and benchmark comparisons want.
#[derive(Debug)]
pub struct SequentialSeed {
    next: AtomicU64,
}

impl SequentialSeed {
    /// Creates a source whose first seed is `base`.
    pub fn new(base: u64) -> Self {
        Self {
            next: AtomicU64::new(base),
        }
    }
}

impl SeedSource for SequentialSeed {
    fn next_seed(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
