//! Reward shaping.
//!
//! Computes four additive components per agent, once per tick outside the
//! grace period:
//! - `visibility`: seekers are paid per hider in sight, hiders for staying unseen
//! - `activity`: penalty for standing still too long
//! - `exploration`: one-time bonus for each new grid cell entered
//! - `coordination`: team spacing term
//!
//! This module is the only place visibility turns into reward.

use crate::config::RewardConfig;
use crate::entity::{Agent, Roster};
use crate::visibility::Sightings;
use hideseek_env::Team;
use nalgebra::Vector3;
use serde::Serialize;
use std::collections::HashSet;

/// Per-agent reward for one tick, by component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub visibility: f32,
    pub activity: f32,
    pub exploration: f32,
    pub coordination: f32,
}

impl RewardBreakdown {
    pub fn total(&self) -> f32 {
        self.visibility + self.activity + self.exploration + self.coordination
    }
}

/// Grid cells an agent has entered this episode.
#[derive(Debug, Clone, Default)]
pub struct ExplorationTracker {
    visited: HashSet<(i32, i32)>,
}

impl ExplorationTracker {
    /// Records the cell containing `position`; true if it was new.
    pub fn visit(&mut self, position: &Vector3<f32>, cell_size: f32) -> bool {
        if !position.x.is_finite() || !position.z.is_finite() || cell_size <= 0.0 {
            return false;
        }
        let cell = (
            (position.x / cell_size).floor() as i32,
            (position.z / cell_size).floor() as i32,
        );
        self.visited.insert(cell)
    }

    pub fn visited_cells(&self) -> usize {
        self.visited.len()
    }

    pub fn clear(&mut self) {
        self.visited.clear();
    }
}

/// Idle-time counter of one agent.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    last_position: Option<Vector3<f32>>,
    idle_frames: u32,
}

impl ActivityTracker {
    /// Feeds the current position and returns the idle frame count.
    ///
    /// The counter grows while the horizontal displacement since the last
    /// call stays below `threshold` and resets to zero otherwise.
    pub fn update(&mut self, position: &Vector3<f32>, threshold: f32) -> u32 {
        if let Some(last) = self.last_position {
            let dx = position.x - last.x;
            let dz = position.z - last.z;
            if (dx * dx + dz * dz).sqrt() < threshold {
                self.idle_frames = self.idle_frames.saturating_add(1);
            } else {
                self.idle_frames = 0;
            }
        }
        self.last_position = Some(*position);
        self.idle_frames
    }

    pub fn idle_frames(&self) -> u32 {
        self.idle_frames
    }

    pub fn clear(&mut self) {
        self.last_position = None;
        self.idle_frames = 0;
    }
}

/// Per-agent tracker state, owned by the arena.
#[derive(Debug, Clone, Default)]
pub struct AgentTrackers {
    pub exploration: ExplorationTracker,
    pub activity: ActivityTracker,
}

impl AgentTrackers {
    pub fn clear(&mut self) {
        self.exploration.clear();
        self.activity.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.exploration.visited_cells() == 0
            && self.activity.idle_frames() == 0
            && self.activity.last_position.is_none()
    }
}

/// The reward shaping engine.
#[derive(Debug, Clone)]
pub struct RewardShaper {
    config: RewardConfig,
}

impl RewardShaper {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Computes this tick's shaped reward for every agent.
    ///
    /// Inactive agents get an all-zero breakdown and their trackers are left
    /// untouched. `trackers` is indexed like `roster.agents`; a missing entry
    /// yields zero activity and exploration terms.
    pub fn compute(
        &self,
        roster: &Roster,
        sightings: &Sightings,
        trackers: &mut [AgentTrackers],
    ) -> Vec<RewardBreakdown> {
        let hider_term = self.coordination(roster, Team::Hider);
        let seeker_term = self.coordination(roster, Team::Seeker);

        roster
            .agents
            .iter()
            .map(|agent| {
                if !agent.active {
                    return RewardBreakdown::default();
                }

                let mut breakdown = RewardBreakdown {
                    visibility: self.visibility(agent, roster, sightings),
                    coordination: match agent.team {
                        Team::Hider => hider_term,
                        Team::Seeker => seeker_term,
                    },
                    ..Default::default()
                };

                if let Some(t) = trackers.get_mut(agent.id.index()) {
                    let position = agent.position();
                    let idle = t.activity.update(&position, self.config.movement_threshold);
                    if idle > self.config.idle_threshold_steps {
                        breakdown.activity = self.config.idle_penalty;
                    }
                    if t.exploration.visit(&position, self.config.exploration_cell_size) {
                        breakdown.exploration = self.config.exploration_bonus;
                    }
                }

                breakdown
            })
            .collect()
    }

    fn visibility(&self, agent: &Agent, roster: &Roster, sightings: &Sightings) -> f32 {
        let r = self.config.visibility_reward;
        match agent.team {
            Team::Seeker => {
                let visible = roster
                    .active(Team::Hider)
                    .filter(|h| sightings.sees(agent.id, h.id))
                    .count();
                if visible > 0 {
                    r * visible as f32
                } else {
                    -r
                }
            }
            Team::Hider => {
                let seen = roster
                    .active(Team::Seeker)
                    .any(|s| sightings.sees(s.id, agent.id));
                if seen {
                    -r
                } else {
                    r + self.config.perfect_hide_bonus
                }
            }
        }
    }

    /// Team spacing term shared by every active member of `team`.
    fn coordination(&self, roster: &Roster, team: Team) -> f32 {
        let positions: Vec<Vector3<f32>> = roster.active(team).map(|a| a.position()).collect();
        let Some(mean) = mean_planar_distance(&positions) else {
            return 0.0;
        };

        let c = self.config.coordination_reward;
        match team {
            Team::Hider => {
                let optimal = self.config.optimal_hider_distance;
                if optimal <= 0.0 {
                    return 0.0;
                }
                c * (1.0 - (mean - optimal).abs() / optimal).clamp(0.0, 1.0)
            }
            Team::Seeker => {
                let spread = self.config.seeker_spread_distance;
                if spread <= 0.0 {
                    return 0.0;
                }
                c * (mean / spread).clamp(0.0, 1.0)
            }
        }
    }
}

/// Mean pairwise XZ distance; `None` for fewer than two points.
fn mean_planar_distance(points: &[Vector3<f32>]) -> Option<f32> {
    if points.len() < 2 {
        return None;
    }
    let mut sum = 0.0;
    let mut pairs = 0;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let dx = points[i].x - points[j].x;
            let dz = points[i].z - points[j].z;
            sum += (dx * dx + dz * dz).sqrt();
            pairs += 1;
        }
    }
    let mean = sum / pairs as f32;
    mean.is_finite().then_some(mean)
}
