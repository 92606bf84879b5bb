//! SimWorld - one arena driven by two policies.

use crate::policies::PolicyKind;
use crate::seeds::SeedDeriver;

use hideseek_core::{Arena, ArenaConfig, EpisodeEvent, EpisodeSummary, StepOutcome};
use hideseek_env::{KinematicWorld, PhysicsBackend, Policy, Team};
use tracing::debug;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Arena rules; its `seed` is overwritten from the master seed
    pub arena: ArenaConfig,

    /// Policy family driving the hiders
    pub hider_policy: PolicyKind,

    /// Policy family driving the seekers
    pub seeker_policy: PolicyKind,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            arena: ArenaConfig::default(),
            hider_policy: PolicyKind::Heuristic,
            seeker_policy: PolicyKind::Heuristic,
        }
    }
}

/// Everything that happened in one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcome: StepOutcome,

    /// Events drained from the arena, in emission order
    pub events: Vec<EpisodeEvent>,
}

/// The SimWorld - an arena plus the policies that drive it.
pub struct SimWorld<P: PhysicsBackend = KinematicWorld> {
    arena: Arena<P>,

    hider_policy: Box<dyn Policy>,

    seeker_policy: Box<dyn Policy>,

    /// Ticks since creation, across episodes
    tick_count: u64,
}

impl SimWorld<KinematicWorld> {
    /// Creates a world over the reference physics backend.
    ///
    /// The arena and policy seeds are derived from `config.seed` for arena
    /// index `index`.
    pub fn new(config: SimConfig, index: usize) -> Self {
        let seeds = SeedDeriver::new(config.seed);
        let arena_config = ArenaConfig {
            seed: seeds.arena_seed(index),
            ..config.arena.clone()
        };
        let arena = Arena::kinematic(arena_config);

        let layout = *arena.encoder().layout();
        let scale = arena.config().position_normalizer();
        let hider_policy = config.hider_policy.build(
            Team::Hider,
            layout,
            scale,
            seeds.policy_seed(index, Team::Hider),
        );
        let seeker_policy = config.seeker_policy.build(
            Team::Seeker,
            layout,
            scale,
            seeds.policy_seed(index, Team::Seeker),
        );

        Self::with_policies(arena, hider_policy, seeker_policy)
    }
}

impl<P: PhysicsBackend> SimWorld<P> {
    /// Wraps an existing arena.
    pub fn with_policies(
        arena: Arena<P>,
        hider_policy: Box<dyn Policy>,
        seeker_policy: Box<dyn Policy>,
    ) -> Self {
        Self {
            arena,
            hider_policy,
            seeker_policy,
            tick_count: 0,
        }
    }

    pub fn arena(&self) -> &Arena<P> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena<P> {
        &mut self.arena
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Observes, queries the policies, steps the arena and forwards
    /// episode-end notifications.
    pub fn tick(&mut self) -> TickReport {
        let observations = self.arena.observe_all();
        let actions: Vec<Vec<f32>> = self
            .arena
            .roster()
            .agents
            .iter()
            .zip(&observations)
            .map(|(agent, obs)| {
                let policy = match agent.team {
                    Team::Hider => &mut self.hider_policy,
                    Team::Seeker => &mut self.seeker_policy,
                };
                policy.act(agent.id, agent.team, obs)
            })
            .collect();

        let outcome = self.arena.step(&actions);
        let events = self.arena.drain_events();

        for event in &events {
            if let EpisodeEvent::AgentEpisodeEnded {
                agent,
                outcome,
                cumulative_reward,
            } = event
            {
                let team = self.team_of(*agent);
                let policy = match team {
                    Some(Team::Hider) => &mut self.hider_policy,
                    Some(Team::Seeker) => &mut self.seeker_policy,
                    None => continue,
                };
                policy.episode_ended(*agent, *outcome, *cumulative_reward);
            }
        }

        self.tick_count += 1;
        TickReport { outcome, events }
    }

    fn team_of(&self, agent: hideseek_env::AgentId) -> Option<Team> {
        self.arena.roster().agent(agent).map(|a| a.team)
    }

    /// Runs until `episodes` more episodes have finished.
    pub fn run_episodes(&mut self, episodes: usize) -> Vec<EpisodeSummary> {
        let mut summaries = Vec::with_capacity(episodes);
        let max_ticks =
            (self.arena.config().max_episode_steps + 1).saturating_mul(episodes as u64);

        let mut ticks = 0;
        while summaries.len() < episodes && ticks < max_ticks {
            if let Some(summary) = self.tick().outcome.finished {
                debug!(
                    "Episode {} done: {} ({} steps)",
                    summary.episode, summary.outcome, summary.steps
                );
                summaries.push(summary);
            }
            ticks += 1;
        }
        summaries
    }
}
