//! Scenario runner - drives arenas through scripted situations and checks
//! the episode rules hold.

use crate::error::SimError;
use crate::exporter::{SimExport, SimFrame};
use crate::policies::PolicyKind;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld, TickReport};

use hideseek_core::{ArenaConfig, EpisodeEvent, EpisodeSummary};
use hideseek_env::{Aabb, EpisodeOutcome, Team};
use nalgebra::Vector3;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Episodes finished
    pub episodes: Vec<EpisodeSummary>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub hider_wins: u32,
    pub seeker_wins: u32,
    pub captures: u32,
    pub grabs: u32,
    pub locks: u32,
    pub unlocks: u32,
    pub out_of_bounds: u32,
    pub respawns: u32,

    /// Ticks that started inside a grace period
    pub grace_ticks: u64,

    /// Opponent pairs in sight, summed over ticks
    pub sightings: u64,

    /// Mean of the per-episode hider occlusion means, when instrumented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_hider_occlusion: Option<f32>,

    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl ScenarioMetrics {
    fn absorb(&mut self, summary: &EpisodeSummary) {
        match summary.outcome {
            EpisodeOutcome::HidersWin => self.hider_wins += 1,
            EpisodeOutcome::SeekersWin => self.seeker_wins += 1,
        }
        self.captures += summary.captures;
        self.grabs += summary.grabs;
        self.locks += summary.locks;
        self.unlocks += summary.unlocks;
        self.out_of_bounds += summary.out_of_bounds;
        self.respawns += summary.respawns;
    }
}

/// Runs harness scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Arena rules each scenario starts from
    base: ArenaConfig,

    /// Episodes to play in multi-episode scenarios
    episodes: usize,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            base: ArenaConfig::default(),
            episodes: 2,
        }
    }

    /// Sets the arena rules scenarios build on.
    pub fn with_config(mut self, config: ArenaConfig) -> Self {
        self.base = config;
        self
    }

    /// Sets the number of episodes per scenario.
    pub fn with_episodes(mut self, episodes: usize) -> Self {
        self.episodes = episodes.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        self.drive(scenario, None)
    }

    /// Runs a scenario recording every tick, then writes the frames to `path`.
    pub fn run_with_export(
        &self,
        scenario: ScenarioId,
        path: impl AsRef<Path>,
    ) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={}) with export", scenario.name(), self.seed);

        let mut export = SimExport::new(scenario.name(), self.seed, self.base.tick_seconds);
        let result = self.drive(scenario, Some(&mut export));
        export.finalize(result.passed, result.failure_reason.clone());
        export.write_to_file(&path)?;

        info!(
            "Exported {} frames to {}",
            export.frames.len(),
            path.as_ref().display()
        );
        Ok(result)
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Builds the world for `scenario` and the number of episodes to play.
    fn setup(&self, scenario: ScenarioId) -> (SimWorld, usize) {
        let mut arena = self.base.clone();
        let mut hider_policy = PolicyKind::Heuristic;
        let mut seeker_policy = PolicyKind::Heuristic;
        let episodes = self.episodes;

        match scenario {
            ScenarioId::GracePeriod => {
                arena.max_episode_steps = 100;
                arena.grace_period_fraction = 0.4;
            }
            ScenarioId::Timeout => {
                arena.max_episode_steps = 100;
                arena.capture.enabled = false;
                seeker_policy = PolicyKind::Idle;
            }
            ScenarioId::CaptureRush => {
                arena.max_episode_steps = 200;
                arena.capture.enabled = true;
                arena.capture.capture_distance = arena.arena_size * 2.0;
                arena.capture.captures_to_win = arena.num_hiders.max(1) as u32;
            }
            ScenarioId::Shelter => {
                arena.max_episode_steps = 150;
                arena.capture.enabled = false;
                arena.instrumentation = true;
                arena.visibility.cache_enabled = false;
            }
            ScenarioId::Chaos => {
                arena.max_episode_steps = 150;
                arena.capture.enabled = true;
                hider_policy = PolicyKind::Random;
                seeker_policy = PolicyKind::Random;
            }
            ScenarioId::Solo => {
                arena.max_episode_steps = 150;
                arena.num_hiders = 1;
                arena.num_seekers = 1;
            }
        }

        let config = SimConfig {
            seed: self.seed,
            arena,
            hider_policy,
            seeker_policy,
        };
        let mut world = SimWorld::new(config, 0);

        if scenario == ScenarioId::Shelter {
            let height = world.arena().config().wall_height;
            let offset = world.arena().config().half_extent() * 0.4;
            for (x, z) in [(offset, offset), (-offset, offset), (offset, -offset), (-offset, -offset)] {
                world.arena_mut().add_occluder(Aabb::from_center(
                    Vector3::new(x, height * 0.5, z),
                    Vector3::new(1.0, height * 0.5, 1.0),
                ));
            }
        }

        (world, episodes)
    }

    // =========================================================================
    // Driver
    // =========================================================================

    fn drive(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        let (mut world, episodes) = self.setup(scenario);
        let mut checks = ScenarioChecks::new(scenario, &world);
        let mut metrics = ScenarioMetrics::default();
        let mut summaries: Vec<EpisodeSummary> = Vec::new();
        let mut failure: Option<String> = None;

        let max_ticks = (world.arena().config().max_episode_steps + 1) * episodes as u64;
        let mut ticks = 0;

        while summaries.len() < episodes && ticks < max_ticks {
            checks.before(&world);
            if world.arena().state().is_grace_period {
                metrics.grace_ticks += 1;
            }

            let report = world.tick();
            ticks += 1;
            metrics.sightings += count_sightings(&world);

            if let Err(reason) = checks.after(&world, &report) {
                failure = Some(reason);
            }
            if let Some(summary) = &report.outcome.finished {
                metrics.absorb(summary);
                summaries.push(summary.clone());
            }
            if let Some(export) = export.as_deref_mut() {
                export.add_frame(SimFrame::capture(
                    ticks - 1,
                    world.arena(),
                    &report.outcome.rewards,
                    report.events,
                ));
            }

            if failure.is_some() {
                break;
            }
        }

        if failure.is_none() && summaries.len() < episodes {
            failure = Some(format!(
                "Only {}/{} episodes finished within {} ticks",
                summaries.len(),
                episodes,
                max_ticks
            ));
        }
        if failure.is_none() {
            failure = checks.finish(&summaries).err();
        }

        let occlusions: Vec<f32> = summaries
            .iter()
            .filter_map(|s| s.mean_hider_occlusion)
            .collect();
        if !occlusions.is_empty() {
            metrics.mean_hider_occlusion =
                Some(occlusions.iter().sum::<f32>() / occlusions.len() as f32);
        }
        let stats = world.arena().cache_stats();
        metrics.cache_hits = stats.hits;
        metrics.cache_misses = stats.misses;

        let passed = failure.is_none();
        if let Some(reason) = &failure {
            warn!("Scenario {} failed: {}", scenario.name(), reason);
        } else {
            info!(
                "Scenario {} passed: {} episodes, {} ticks",
                scenario.name(),
                summaries.len(),
                ticks
            );
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: ticks,
            episodes: summaries,
            failure_reason: failure,
            metrics,
        }
    }
}

fn count_sightings(world: &SimWorld) -> u64 {
    let arena = world.arena();
    let sightings = arena.sightings();
    arena
        .roster()
        .agents
        .iter()
        .map(|a| sightings.visible_count(a.id) as u64)
        .sum()
}

// =========================================================================
// Assertions
// =========================================================================

/// Per-scenario assertion state.
struct ScenarioChecks {
    scenario: ScenarioId,

    grace_steps: u64,

    max_steps: u64,

    /// Seeker XZ positions at the start of a frozen tick
    frozen_seekers: Vec<(usize, f32, f32)>,

    /// Grace ticks seen in the current episode
    grace_ticks: u64,

    /// Tick at which each episode's grace ended
    grace_ended: Vec<u64>,
}

impl ScenarioChecks {
    fn new(scenario: ScenarioId, world: &SimWorld) -> Self {
        let arena = world.arena();
        Self {
            scenario,
            grace_steps: arena.grace_period_steps(),
            max_steps: arena.config().max_episode_steps,
            frozen_seekers: Vec::new(),
            grace_ticks: 0,
            grace_ended: Vec::new(),
        }
    }

    fn before(&mut self, world: &SimWorld) {
        self.frozen_seekers.clear();
        if self.scenario != ScenarioId::GracePeriod {
            return;
        }
        let arena = world.arena();
        if arena.state().is_grace_period {
            self.grace_ticks += 1;
        }
        for (index, agent) in arena.roster().agents.iter().enumerate() {
            if agent.team == Team::Seeker && agent.frozen {
                let p = agent.position();
                self.frozen_seekers.push((index, p.x, p.z));
            }
        }
    }

    fn after(&mut self, world: &SimWorld, report: &TickReport) -> Result<(), String> {
        let arena = world.arena();
        let outcome = &report.outcome;

        if outcome.rewards.len() != arena.num_agents() {
            return Err(format!(
                "{} rewards for {} agents",
                outcome.rewards.len(),
                arena.num_agents()
            ));
        }

        match self.scenario {
            ScenarioId::GracePeriod => {
                if outcome.finished.is_none() {
                    for &(index, x, z) in &self.frozen_seekers {
                        let p = arena.roster().agents[index].position();
                        if (p.x - x).abs() > 1e-4 || (p.z - z).abs() > 1e-4 {
                            return Err(format!(
                                "Frozen seeker {} moved at step {}",
                                index, outcome.step
                            ));
                        }
                    }
                }
                for event in &report.events {
                    if let EpisodeEvent::GraceEnded { step, .. } = event {
                        if *step != self.grace_steps || self.grace_ticks != self.grace_steps {
                            return Err(format!(
                                "Grace ended at step {} after {} grace ticks, expected {}",
                                step, self.grace_ticks, self.grace_steps
                            ));
                        }
                        self.grace_ended.push(*step);
                    }
                }
                if !arena.state().is_grace_period
                    && arena.roster().agents.iter().any(|a| a.frozen)
                {
                    return Err(format!("Agent still frozen after grace at step {}", outcome.step));
                }
            }
            ScenarioId::CaptureRush => {
                for event in &report.events {
                    if let EpisodeEvent::Captured { step, .. } = event {
                        if *step < self.grace_steps {
                            return Err(format!("Capture during grace at step {}", step));
                        }
                    }
                }
            }
            ScenarioId::Shelter => {
                if outcome.finished.is_none() {
                    self.check_sightings(world)?;
                }
            }
            ScenarioId::Chaos => {
                if !arena.check_invariants() {
                    return Err(format!("Object invariant broken at step {}", outcome.step));
                }
                if let Some(r) = outcome.rewards.iter().find(|r| !r.is_finite()) {
                    return Err(format!("Non-finite reward {} at step {}", r, outcome.step));
                }
                let size = arena.observation_size();
                for observation in arena.observe_all() {
                    if observation.len() != size {
                        return Err(format!(
                            "Observation length {} != {}",
                            observation.len(),
                            size
                        ));
                    }
                    if observation.iter().any(|v| !v.is_finite()) {
                        return Err(format!("Non-finite observation at step {}", outcome.step));
                    }
                }
            }
            ScenarioId::Solo => {
                if let Some(b) = outcome.breakdowns.iter().find(|b| b.coordination != 0.0) {
                    return Err(format!(
                        "Coordination {} paid with one agent per team",
                        b.coordination
                    ));
                }
            }
            ScenarioId::Timeout => {}
        }

        if outcome.finished.is_some() {
            self.grace_ticks = 0;
        }
        Ok(())
    }

    /// Every recorded sighting is an in-range opponent pair that an uncached
    /// query agrees with.
    fn check_sightings(&self, world: &SimWorld) -> Result<(), String> {
        let arena = world.arena();
        let view_distance = arena.config().visibility.view_distance;
        let sightings = arena.sightings();

        for observer in &arena.roster().agents {
            for target in &arena.roster().agents {
                let seen = sightings.sees(observer.id, target.id);
                if observer.team == target.team {
                    if seen {
                        return Err(format!("{} sighted teammate {}", observer.id, target.id));
                    }
                    continue;
                }
                if seen != arena.can_see(observer.id, target.id) {
                    return Err(format!(
                        "Sighting {} -> {} disagrees with line of sight",
                        observer.id, target.id
                    ));
                }
                if !seen {
                    continue;
                }
                let distance = (target.position() - observer.position()).norm();
                if distance > view_distance {
                    return Err(format!(
                        "{} sighted {} at {:.2} beyond view distance",
                        observer.id, target.id, distance
                    ));
                }
            }
        }
        Ok(())
    }

    fn finish(&self, summaries: &[EpisodeSummary]) -> Result<(), String> {
        match self.scenario {
            ScenarioId::GracePeriod => {
                if self.grace_ended.len() != summaries.len() {
                    return Err(format!(
                        "{} grace periods ended over {} episodes",
                        self.grace_ended.len(),
                        summaries.len()
                    ));
                }
            }
            ScenarioId::Timeout => {
                for s in summaries {
                    if s.outcome != EpisodeOutcome::HidersWin || s.steps != self.max_steps {
                        return Err(format!(
                            "Episode {} ended {} after {} steps, expected hiders_win after {}",
                            s.episode, s.outcome, s.steps, self.max_steps
                        ));
                    }
                }
            }
            ScenarioId::CaptureRush => {
                for s in summaries {
                    if s.outcome != EpisodeOutcome::SeekersWin || s.steps != self.grace_steps + 1 {
                        return Err(format!(
                            "Episode {} ended {} after {} steps, expected seekers_win after {}",
                            s.episode,
                            s.outcome,
                            s.steps,
                            self.grace_steps + 1
                        ));
                    }
                }
            }
            ScenarioId::Shelter => {
                for s in summaries {
                    match s.mean_hider_occlusion {
                        Some(o) if (0.0..=1.0).contains(&o) => {
                            debug!("Episode {} mean hider occlusion {:.3}", s.episode, o)
                        }
                        other => {
                            return Err(format!(
                                "Episode {} occlusion {:?} outside [0, 1]",
                                s.episode, other
                            ))
                        }
                    }
                }
            }
            ScenarioId::Chaos | ScenarioId::Solo => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42).with_episodes(1)
    }

    #[test]
    fn test_grace_period_scenario() {
        // Grace must restart with every episode, not only the first
        let result = ScenarioRunner::new(42)
            .with_episodes(2)
            .run(ScenarioId::GracePeriod);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.grace_ticks, 80);
        assert_eq!(result.episodes.len(), 2);
    }

    #[test]
    fn test_timeout_scenario() {
        let result = ScenarioRunner::new(7).run(ScenarioId::Timeout);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.hider_wins, 2);
        assert_eq!(result.total_ticks, 200);
    }

    #[test]
    fn test_capture_rush_scenario() {
        let result = runner().run(ScenarioId::CaptureRush);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.seeker_wins, 1);
        assert_eq!(result.metrics.captures, 2);
    }

    #[test]
    fn test_shelter_scenario() {
        let result = runner().run(ScenarioId::Shelter);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.mean_hider_occlusion.is_some());
        assert_eq!(result.metrics.cache_hits, 0);
    }

    #[test]
    fn test_chaos_scenario() {
        let result = runner().run(ScenarioId::Chaos);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_solo_scenario() {
        let result = runner().run(ScenarioId::Solo);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_run_with_export() {
        let path = std::env::temp_dir().join("hideseek_runner_export.json");
        let result = runner()
            .run_with_export(ScenarioId::CaptureRush, &path)
            .unwrap();
        assert!(result.passed);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"captured\""));
        let _ = std::fs::remove_file(&path);
    }
}
