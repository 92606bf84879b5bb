//! Headless multi-arena runner.
//!
//! Arenas share nothing, so each one runs start to finish on its own
//! blocking worker of a multi-thread tokio runtime.

use crate::error::SimError;
use crate::policies::PolicyKind;
use crate::world::{SimConfig, SimWorld};

use hideseek_core::{ArenaConfig, EpisodeSummary};
use hideseek_env::EpisodeOutcome;
use serde::Serialize;
use tracing::{debug, info};

/// What one arena produced.
#[derive(Debug, Clone, Serialize)]
pub struct ArenaReport {
    /// Arena index within the run
    pub arena: usize,

    /// Arena seed derived from the master seed
    pub seed: u64,

    pub episodes: Vec<EpisodeSummary>,

    pub hider_wins: u32,

    pub seeker_wins: u32,

    pub total_ticks: u64,
}

impl ArenaReport {
    fn from_world(arena: usize, world: &SimWorld, episodes: Vec<EpisodeSummary>) -> Self {
        let hider_wins = episodes
            .iter()
            .filter(|e| e.outcome == EpisodeOutcome::HidersWin)
            .count() as u32;
        Self {
            arena,
            seed: world.arena().config().seed,
            seeker_wins: episodes.len() as u32 - hider_wins,
            hider_wins,
            episodes,
            total_ticks: world.tick_count(),
        }
    }
}

/// Plays `episodes` episodes in one arena on the calling thread.
pub fn run_arena(config: SimConfig, index: usize, episodes: usize) -> ArenaReport {
    let mut world = SimWorld::new(config, index);
    let summaries = world.run_episodes(episodes);
    debug!(
        "Arena {} done: {} episodes in {} ticks",
        index,
        summaries.len(),
        world.tick_count()
    );
    ArenaReport::from_world(index, &world, summaries)
}

/// Runs every arena on the blocking pool and collects reports in index
/// order.
pub async fn run_arenas(
    config: SimConfig,
    arenas: usize,
    episodes: usize,
) -> Result<Vec<ArenaReport>, SimError> {
    let handles: Vec<_> = (0..arenas)
        .map(|index| {
            let config = config.clone();
            tokio::task::spawn_blocking(move || run_arena(config, index, episodes))
        })
        .collect();

    let mut reports = Vec::with_capacity(arenas);
    for handle in handles {
        reports.push(handle.await?);
    }
    Ok(reports)
}

/// Builds a runtime and runs `arenas` independent arenas with `policy`
/// driving both teams.
pub fn run_parallel(
    config: ArenaConfig,
    arenas: usize,
    episodes: usize,
    master_seed: u64,
    policy: PolicyKind,
) -> Result<Vec<ArenaReport>, SimError> {
    info!(
        "Running {} arenas x {} episodes (seed={}, policy={})",
        arenas, episodes, master_seed, policy
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let sim = SimConfig {
        seed: master_seed,
        arena: config,
        hider_policy: policy,
        seeker_policy: policy,
    };
    let reports = runtime.block_on(run_arenas(sim, arenas, episodes))?;

    let (hiders, seekers) = reports
        .iter()
        .fold((0, 0), |(h, s), r| (h + r.hider_wins, s + r.seeker_wins));
    info!("All arenas finished: hiders {} / seekers {}", hiders, seekers);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short() -> ArenaConfig {
        ArenaConfig {
            max_episode_steps: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_parallel_reports_every_arena() {
        let reports = run_parallel(short(), 3, 2, 11, PolicyKind::Random).unwrap();

        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.arena, i);
            assert_eq!(report.episodes.len(), 2);
            assert_eq!(report.hider_wins + report.seeker_wins, 2);
        }
        assert_ne!(reports[0].seed, reports[1].seed);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = run_parallel(short(), 2, 1, 5, PolicyKind::Heuristic).unwrap();

        let config = SimConfig {
            seed: 5,
            arena: short(),
            hider_policy: PolicyKind::Heuristic,
            seeker_policy: PolicyKind::Heuristic,
        };
        let sequential = run_arena(config, 1, 1);

        assert_eq!(parallel[1].seed, sequential.seed);
        assert_eq!(parallel[1].episodes, sequential.episodes);
    }
}
