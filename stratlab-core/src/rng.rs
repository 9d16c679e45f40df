//! Deterministic RNG hierarchy.
//!
//! A master seed expands into sub-seeds per `(scope, stream, iteration)` via
//! BLAKE3. Derivation is hash-based, so the sub-seed for an iteration does not
//! depend on which other iterations ran before it or on thread scheduling.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for one `(scope, stream, iteration)`; `scope` is typically a
    /// session id and `stream` names the consumer (e.g. `"proposal"`).
    pub fn sub_seed(&self, scope: &str, stream: &str, iteration: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(scope.as_bytes());
        hasher.update(&[0]);
        hasher.update(stream.as_bytes());
        hasher.update(&[0]);
        hasher.update(&iteration.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, scope: &str, stream: &str, iteration: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(scope, stream, iteration))
    }
}
