//! Seed management for reproducible runs.

use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Derives stable per-component seeds from the global `--seed`.
///
/// Each distributed rank gets a distinct stream so replicas do not draw the
/// same batches.
#[derive(Debug, Clone)]
pub struct SeedManager {
    global_seed: u64,
    rank: u32,
    component_seeds: HashMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64, rank: u32) -> Self {
        Self {
            global_seed,
            rank,
            component_seeds: HashMap::new(),
        }
    }

    pub fn global_seed(&self) -> u64 {
        self.global_seed
    }

    pub fn get_seed(&mut self, component: &str) -> u64 {
        let (global, rank) = (self.global_seed, self.rank);
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| derive_seed(global, rank, component))
    }

    pub fn rng(&mut self, component: &str) -> StdRng {
        StdRng::seed_from_u64(self.get_seed(component))
    }
}

fn derive_seed(global: u64, rank: u32, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global.to_le_bytes());
    hasher.update(rank.to_le_bytes());
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
