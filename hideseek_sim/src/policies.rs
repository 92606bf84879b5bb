//! Scripted policies used by the harness.
//!
//! None of these learn. They exist to drive arenas through realistic
//! situations (chasing, fleeing, grabbing, locking) in scenarios and
//! benchmarks. The heuristics read the observation vector through
//! `ObservationLayout` offsets, exactly as a learned policy would see it.

use hideseek_core::encoding::{ObservationLayout, ACTION_SIZE, SLOT_SIZE};
use hideseek_env::{AgentId, EpisodeOutcome, Policy, Team};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Does nothing.
#[derive(Debug, Default)]
pub struct IdlePolicy;

impl Policy for IdlePolicy {
    fn act(&mut self, _agent: AgentId, _team: Team, _observation: &[f32]) -> Vec<f32> {
        vec![0.0; ACTION_SIZE]
    }

    fn name(&self) -> &str {
        "idle"
    }
}

/// Uniform random actions from a seeded stream.
pub struct RandomPolicy {
    rng: ChaCha8Rng,

    /// Probability of pressing each binary channel per tick
    press_probability: f64,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            press_probability: 0.05,
        }
    }

    pub fn with_press_probability(mut self, p: f64) -> Self {
        self.press_probability = p.clamp(0.0, 1.0);
        self
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _agent: AgentId, _team: Team, _observation: &[f32]) -> Vec<f32> {
        let mut action = Vec::with_capacity(ACTION_SIZE);
        for _ in 0..3 {
            action.push(self.rng.gen_range(-1.0..=1.0));
        }
        for _ in 0..2 {
            let pressed = self.rng.gen_bool(self.press_probability);
            action.push(if pressed { 1.0 } else { 0.0 });
        }
        action
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Planar vector read from an observation (x, z components of a 3-block).
fn planar(obs: &[f32], offset: usize) -> (f32, f32) {
    let x = obs.get(offset).copied().unwrap_or(0.0);
    let z = obs.get(offset + 2).copied().unwrap_or(0.0);
    (x, z)
}

fn flag(obs: &[f32], offset: usize) -> bool {
    obs.get(offset).copied().unwrap_or(0.0) > 0.5
}

/// Turns and moves toward `desired` given the agent's `forward`.
///
/// Returns (yaw, forward) commands.
fn steer(forward: (f32, f32), desired: (f32, f32)) -> (f32, f32) {
    let norm = (desired.0 * desired.0 + desired.1 * desired.1).sqrt();
    if norm < 1e-6 {
        return (0.0, 0.0);
    }
    let (dx, dz) = (desired.0 / norm, desired.1 / norm);
    // Right of forward is (f.z, -f.x)
    let side = dx * forward.1 - dz * forward.0;
    let ahead = dx * forward.0 + dz * forward.1;

    let yaw = if ahead < 0.0 && side.abs() < 0.2 {
        1.0
    } else {
        (side * 3.0).clamp(-1.0, 1.0)
    };
    let throttle = if ahead > 0.0 { 1.0 } else { 0.3 };
    (yaw, throttle)
}

/// Chases the nearest visible hider and wanders otherwise.
pub struct HeuristicSeeker {
    layout: ObservationLayout,

    /// Wander phase per agent
    phase: HashMap<AgentId, u64>,
}

impl HeuristicSeeker {
    pub fn new(layout: ObservationLayout) -> Self {
        Self {
            layout,
            phase: HashMap::new(),
        }
    }
}

impl Policy for HeuristicSeeker {
    fn act(&mut self, agent: AgentId, _team: Team, obs: &[f32]) -> Vec<f32> {
        let forward = planar(obs, 3);

        let target = (0..self.layout.opponent_slots)
            .map(|slot| self.layout.opponent_offset(slot))
            .filter(|o| flag(obs, o + SLOT_SIZE - 1))
            .map(|o| planar(obs, o))
            .min_by(|a, b| (a.0.hypot(a.1)).total_cmp(&b.0.hypot(b.1)));

        let (yaw, throttle) = match target {
            Some(relative) => steer(forward, relative),
            None => {
                let t = self.phase.entry(agent).or_insert(agent.0 as u64 * 37);
                *t += 1;
                ((*t as f32 * 0.05).sin() * 0.6, 1.0)
            }
        };

        vec![0.0, throttle, yaw, 0.0, 0.0]
    }

    fn episode_ended(&mut self, agent: AgentId, _outcome: EpisodeOutcome, _reward: f32) {
        self.phase.remove(&agent);
    }

    fn name(&self) -> &str {
        "heuristic_seeker"
    }
}

/// Flees visible seekers, locks nearby objects when unseen and carries one
/// as a shield when chased.
pub struct HeuristicHider {
    layout: ObservationLayout,

    /// Arena half extent, to turn normalized offsets back into meters
    position_scale: f32,

    /// Objects closer than this (meters) are considered in reach
    reach: f32,
}

impl HeuristicHider {
    pub fn new(layout: ObservationLayout, position_scale: f32) -> Self {
        Self {
            layout,
            position_scale,
            reach: 2.0,
        }
    }

    pub fn with_reach(mut self, reach: f32) -> Self {
        self.reach = reach;
        self
    }

    /// Nearest free object in front of the agent, within reach.
    fn object_in_reach(&self, obs: &[f32], forward: (f32, f32)) -> Option<usize> {
        (0..self.layout.object_slots)
            .filter_map(|slot| {
                let o = self.layout.object_offset(slot);
                let grabbed = flag(obs, o + 3);
                let locked = flag(obs, o + 4);
                if grabbed || locked {
                    return None;
                }
                let (x, z) = planar(obs, o);
                let distance = x.hypot(z) * self.position_scale;
                let ahead = x * forward.0 + z * forward.1;
                (distance <= self.reach && ahead > 0.0).then_some((slot, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(slot, _)| slot)
    }
}

impl Policy for HeuristicHider {
    fn act(&mut self, _agent: AgentId, _team: Team, obs: &[f32]) -> Vec<f32> {
        let forward = planar(obs, 3);
        let holding = flag(obs, 9);

        let threat = (0..self.layout.opponent_slots)
            .map(|slot| self.layout.opponent_offset(slot))
            .filter(|o| flag(obs, o + SLOT_SIZE - 1))
            .map(|o| planar(obs, o))
            .min_by(|a, b| (a.0.hypot(a.1)).total_cmp(&b.0.hypot(b.1)));

        let nearby = self.object_in_reach(obs, forward);

        match threat {
            Some((x, z)) => {
                let (yaw, throttle) = steer(forward, (-x, -z));
                // Pick up a shield if one is right in front
                let grab = !holding && nearby.is_some();
                vec![0.0, throttle, yaw, if grab { 1.0 } else { 0.0 }, 0.0]
            }
            None if holding => vec![0.0, 0.0, 0.0, 1.0, 0.0],
            None if nearby.is_some() => vec![0.0, 0.0, 0.0, 0.0, 1.0],
            None => vec![0.0, 0.3, 0.2, 0.0, 0.0],
        }
    }

    fn name(&self) -> &str {
        "heuristic_hider"
    }
}

/// Which policy family drives a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Idle,
    Random,
    Heuristic,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Idle => "idle",
            PolicyKind::Random => "random",
            PolicyKind::Heuristic => "heuristic",
        }
    }

    /// Builds a policy for `team`.
    pub fn build(
        &self,
        team: Team,
        layout: ObservationLayout,
        position_scale: f32,
        seed: u64,
    ) -> Box<dyn Policy> {
        match (self, team) {
            (PolicyKind::Idle, _) => Box::new(IdlePolicy),
            (PolicyKind::Random, _) => Box::new(RandomPolicy::new(seed)),
            (PolicyKind::Heuristic, Team::Seeker) => Box::new(HeuristicSeeker::new(layout)),
            (PolicyKind::Heuristic, Team::Hider) => {
                Box::new(HeuristicHider::new(layout, position_scale))
            }
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(PolicyKind::Idle),
            "random" => Ok(PolicyKind::Random),
            "heuristic" => Ok(PolicyKind::Heuristic),
            _ => Err(format!("Unknown policy: {}", s)),
        }
    }
}
