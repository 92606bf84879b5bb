//! Per-episode statistics.

use crate::entity::Roster;
use hideseek_env::{EpisodeOutcome, Team};
use serde::{Deserialize, Serialize};

/// Summary of one finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    /// Zero-based episode index within the arena
    pub episode: u64,

    pub outcome: EpisodeOutcome,

    /// Ticks played, terminating tick included
    pub steps: u64,

    pub captures: u32,
    pub grabs: u32,
    pub locks: u32,
    pub unlocks: u32,

    /// Agents clamped back inside the walls
    pub out_of_bounds: u32,

    /// Agents respawned after leaving the vertical band
    pub respawns: u32,

    /// Mean cumulative reward of hiders, terminal reward included
    pub hider_mean_reward: f32,

    /// Mean cumulative reward of seekers, terminal reward included
    pub seeker_mean_reward: f32,

    /// Mean occluded share of hiders from their nearest seeker, when instrumented
    pub mean_hider_occlusion: Option<f32>,
}

/// Running counters for the current episode.
#[derive(Debug, Clone, Default)]
pub struct EpisodeMetrics {
    pub captures: u32,
    pub grabs: u32,
    pub locks: u32,
    pub unlocks: u32,
    pub out_of_bounds: u32,
    pub respawns: u32,

    occlusion_sum: f64,
    occlusion_samples: u64,
}

impl EpisodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one occluded-fraction sample.
    pub fn record_occlusion(&mut self, fraction: f32) {
        if fraction.is_finite() {
            self.occlusion_sum += fraction as f64;
            self.occlusion_samples += 1;
        }
    }

    pub fn mean_occlusion(&self) -> Option<f32> {
        if self.occlusion_samples == 0 {
            None
        } else {
            Some((self.occlusion_sum / self.occlusion_samples as f64) as f32)
        }
    }

    /// Closes the episode into a summary. Call before rewards are reset.
    pub fn summarize(
        &self,
        episode: u64,
        outcome: EpisodeOutcome,
        steps: u64,
        roster: &Roster,
    ) -> EpisodeSummary {
        EpisodeSummary {
            episode,
            outcome,
            steps,
            captures: self.captures,
            grabs: self.grabs,
            locks: self.locks,
            unlocks: self.unlocks,
            out_of_bounds: self.out_of_bounds,
            respawns: self.respawns,
            hider_mean_reward: mean_reward(roster, Team::Hider),
            seeker_mean_reward: mean_reward(roster, Team::Seeker),
            mean_hider_occlusion: self.mean_occlusion(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn mean_reward(roster: &Roster, team: Team) -> f32 {
    let (sum, count) = roster
        .team(team)
        .fold((0.0_f32, 0_u32), |(s, n), a| (s + a.cumulative_reward, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
