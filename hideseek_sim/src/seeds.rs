//! Deterministic seed derivation.

use hideseek_env::Team;

/// Mixing constant for per-arena seeds.
const ARENA_MIX: u64 = 0x9e3779b97f4a7c15;

/// Mixing constant for per-policy seeds.
const POLICY_MIX: u64 = 0x517cc1b727220a95;

/// Derives independent, reproducible seeds from one master seed.
///
/// - Deterministic: the same master seed always yields the same seeds
/// - Isolated: adding arenas never changes the seeds of existing ones
/// - Separate streams: an arena's spawn seed and its policies' seeds differ
#[derive(Debug, Clone, Copy)]
pub struct SeedDeriver {
    master_seed: u64,
}

impl SeedDeriver {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Spawn seed for arena `index`.
    pub fn arena_seed(&self, index: usize) -> u64 {
        self.master_seed
            .wrapping_add(index as u64)
            .wrapping_mul(ARENA_MIX)
    }

    /// Seed for the policy driving `team` in arena `index`.
    pub fn policy_seed(&self, index: usize, team: Team) -> u64 {
        let salt = match team {
            Team::Hider => 1,
            Team::Seeker => 2,
        };
        self.arena_seed(index)
            .wrapping_add(salt)
            .wrapping_mul(POLICY_MIX)
    }
}
