//! Arena configuration.
//!
//! A static, read-only description of one arena: geometry, roster, motion,
//! interaction, visibility and reward constants. Every section has a
//! `Default`, and every section is `#[serde(default)]` so JSON files only
//! need the fields they change.

use crate::error::ConfigError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Upper bound on roster size accepted by `validate`.
pub const MAX_AGENTS: usize = 64;

/// Upper bound on object count accepted by `validate`.
pub const MAX_OBJECTS: usize = 64;

/// Complete arena configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Seed for spawn sampling
    pub seed: u64,

    /// Side length of the square playable area (meters)
    pub arena_size: f32,

    /// Height of the boundary walls (meters)
    pub wall_height: f32,

    /// Step budget per episode
    pub max_episode_steps: u64,

    /// Share of the step budget during which seekers are frozen
    pub grace_period_fraction: f64,

    /// Simulated seconds per tick
    pub tick_seconds: f32,

    pub num_hiders: usize,
    pub num_seekers: usize,
    pub num_boxes: usize,
    pub num_ramps: usize,

    pub movement: MovementConfig,
    pub interaction: InteractionConfig,
    pub visibility: VisibilityConfig,
    pub rewards: RewardConfig,
    pub capture: CaptureConfig,
    pub spawn: SpawnConfig,
    pub bounds: BoundsConfig,

    /// Collect per-tick visibility-fraction metrics (costs extra rays)
    pub instrumentation: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            arena_size: 25.0,
            wall_height: 4.0,
            max_episode_steps: 500,
            grace_period_fraction: 0.4,
            tick_seconds: 0.05,
            num_hiders: 2,
            num_seekers: 2,
            num_boxes: 2,
            num_ramps: 1,
            movement: MovementConfig::default(),
            interaction: InteractionConfig::default(),
            visibility: VisibilityConfig::default(),
            rewards: RewardConfig::default(),
            capture: CaptureConfig::default(),
            spawn: SpawnConfig::default(),
            bounds: BoundsConfig::default(),
            instrumentation: false,
        }
    }
}

/// Agent motion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Maximum planar speed (m/s)
    pub move_speed: f32,

    /// Maximum yaw rate (degrees/s)
    pub rotation_speed_deg: f32,

    /// Half extents of an agent's bounding box
    pub agent_half_extents: [f32; 3],
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            rotation_speed_deg: 180.0,
            agent_half_extents: [0.5, 0.5, 0.5],
        }
    }
}

impl MovementConfig {
    pub fn agent_half_extents(&self) -> Vector3<f32> {
        Vector3::from(self.agent_half_extents)
    }
}

/// Grab/lock parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Maximum distance from agent to object origin for grab and lock
    pub grab_range: f32,

    /// Minimum dot(forward, direction-to-object) for an object to be in reach
    pub grab_cone_dot: f32,

    /// Distance in front of the holder where a held object is carried
    pub hold_distance: f32,

    /// Fraction of the remaining gap closed per tick while carrying (0, 1]
    pub hold_smoothing: f32,

    /// Forward impulse added on release; 0 disables throwing
    pub throw_force: f32,

    /// Ticks an agent must wait after a lock or unlock
    pub lock_cooldown_steps: u32,

    /// Objects moving faster than this cannot be locked
    pub lock_max_speed: f32,

    /// Objects with a vertical speed above this are not settled and cannot be locked
    pub ground_tolerance: f32,

    pub box_half_extents: [f32; 3],
    pub ramp_half_extents: [f32; 3],
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            grab_range: 2.5,
            grab_cone_dot: 0.5,
            hold_distance: 1.5,
            hold_smoothing: 0.3,
            throw_force: 2.0,
            lock_cooldown_steps: 10,
            lock_max_speed: 0.1,
            ground_tolerance: 0.05,
            box_half_extents: [0.75, 0.75, 0.75],
            ramp_half_extents: [1.0, 0.5, 1.5],
        }
    }
}

/// Line-of-sight parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Full horizontal field of view (degrees)
    pub view_angle_deg: f32,

    /// Maximum sight distance (meters)
    pub view_distance: f32,

    /// Eye height above the observer's origin
    pub eye_height: f32,

    /// Vertical offset of the near-top/near-bottom target samples
    pub sample_offset: f32,

    /// Lateral offset of the side samples used by the visibility fraction
    pub lateral_offset: f32,

    /// A ray hit this close to its endpoint still counts as unobstructed
    pub hit_epsilon: f32,

    pub cache_enabled: bool,

    /// Steps a cached result stays valid
    pub cache_frames: u64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            view_angle_deg: 90.0,
            view_distance: 20.0,
            eye_height: 0.4,
            sample_offset: 0.4,
            lateral_offset: 0.35,
            hit_epsilon: 0.1,
            cache_enabled: true,
            cache_frames: 3,
        }
    }
}

/// Reward constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Magnitude of the per-tick visibility reward
    pub visibility_reward: f32,

    /// Extra reward for a hider seen by nobody
    pub perfect_hide_bonus: f32,

    /// Terminal reward (+ winners, - losers)
    pub win_reward: f32,

    /// Subtracted from every active agent every tick
    pub step_penalty: f32,

    /// Subtracted when an agent is clamped back inside the walls
    pub out_of_bounds_penalty: f32,

    /// Subtracted when an agent leaves the vertical band and is respawned
    pub fall_penalty: f32,

    /// Added (usually negative) for every idle tick past the threshold
    pub idle_penalty: f32,

    /// Consecutive idle ticks tolerated before the idle penalty applies
    pub idle_threshold_steps: u32,

    /// Per-tick horizontal movement below this counts as idle
    pub movement_threshold: f32,

    /// One-time bonus per newly visited cell
    pub exploration_bonus: f32,

    /// Side length of an exploration cell
    pub exploration_cell_size: f32,

    /// Scale of the team coordination term
    pub coordination_reward: f32,

    /// Mean hider spacing that earns the full coordination reward
    pub optimal_hider_distance: f32,

    /// Mean seeker spacing at which the coordination reward saturates
    pub seeker_spread_distance: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            visibility_reward: 0.1,
            perfect_hide_bonus: 0.05,
            win_reward: 1.0,
            step_penalty: 0.001,
            out_of_bounds_penalty: 0.1,
            fall_penalty: 1.0,
            idle_penalty: -0.01,
            idle_threshold_steps: 50,
            movement_threshold: 0.01,
            exploration_bonus: 0.02,
            exploration_cell_size: 2.5,
            coordination_reward: 0.02,
            optimal_hider_distance: 3.0,
            seeker_spread_distance: 10.0,
        }
    }
}

/// Optional capture rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,

    /// Seeker-to-hider distance at which the hider is caught
    pub capture_distance: f32,

    /// Captures that end the episode in favor of seekers
    pub captures_to_win: u32,

    /// Added to the seeker, subtracted from the hider, per capture
    pub capture_reward: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capture_distance: 1.5,
            captures_to_win: 2,
            capture_reward: 0.5,
        }
    }
}

/// Spawn sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Minimum horizontal distance between spawned entities
    pub min_separation: f32,

    /// Rejection-sampling attempts per entity
    pub max_attempts: u32,

    /// Keep-out distance from the walls
    pub edge_margin: f32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            min_separation: 2.0,
            max_attempts: 30,
            edge_margin: 1.5,
        }
    }
}

/// Vertical playable band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Agents whose origin drops below this height are respawned
    pub floor_limit: f32,

    /// Agents above `wall_height * ceiling_factor` are respawned
    pub ceiling_factor: f32,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            floor_limit: -1.0,
            ceiling_factor: 2.0,
        }
    }
}

impl ArenaConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: ArenaConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no arena can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agents = self.num_hiders + self.num_seekers;
        if agents == 0 {
            return Err(ConfigError::invalid("arena needs at least one agent"));
        }
        if agents > MAX_AGENTS {
            return Err(ConfigError::invalid(format!(
                "{} agents exceeds the limit of {}",
                agents, MAX_AGENTS
            )));
        }
        if self.num_objects() > MAX_OBJECTS {
            return Err(ConfigError::invalid(format!(
                "{} objects exceeds the limit of {}",
                self.num_objects(),
                MAX_OBJECTS
            )));
        }
        Ok(())
    }

    /// Returns a copy with inconsistent values replaced by safe fallbacks.
    pub fn sanitized(&self) -> Self {
        let mut c = self.clone();

        if !(c.arena_size.is_finite() && c.arena_size > 0.0) {
            warn!("arena_size {} is unusable, falling back to 25", c.arena_size);
            c.arena_size = 25.0;
        }
        if !(c.wall_height.is_finite() && c.wall_height > 0.0) {
            warn!("wall_height {} is unusable, falling back to 4", c.wall_height);
            c.wall_height = 4.0;
        }
        if !(0.0..=1.0).contains(&c.grace_period_fraction) {
            let clamped = if c.grace_period_fraction.is_nan() {
                0.0
            } else {
                c.grace_period_fraction.clamp(0.0, 1.0)
            };
            warn!("grace_period_fraction {} clamped to {}", c.grace_period_fraction, clamped);
            c.grace_period_fraction = clamped;
        }
        if !(c.tick_seconds.is_finite() && c.tick_seconds > 0.0) {
            warn!("tick_seconds {} is unusable, falling back to 0.05", c.tick_seconds);
            c.tick_seconds = 0.05;
        }
        if !(c.movement.move_speed.is_finite() && c.movement.move_speed > 0.0) {
            warn!("move_speed {} is unusable, falling back to 5", c.movement.move_speed);
            c.movement.move_speed = 5.0;
        }
        if !(c.interaction.hold_smoothing > 0.0 && c.interaction.hold_smoothing <= 1.0) {
            warn!("hold_smoothing {} clamped into (0, 1]", c.interaction.hold_smoothing);
            c.interaction.hold_smoothing = 0.3;
        }
        if !(c.rewards.exploration_cell_size.is_finite() && c.rewards.exploration_cell_size > 0.0) {
            warn!(
                "exploration_cell_size {} is unusable, falling back to 2.5",
                c.rewards.exploration_cell_size
            );
            c.rewards.exploration_cell_size = 2.5;
        }
        if c.spawn.edge_margin * 2.0 >= c.arena_size {
            warn!("edge_margin {} leaves no room to spawn, using 0", c.spawn.edge_margin);
            c.spawn.edge_margin = 0.0;
        }

        c
    }

    /// Number of ticks at the start of every episode with seekers frozen.
    pub fn grace_period_steps(&self) -> u64 {
        let fraction = self.grace_period_fraction.clamp(0.0, 1.0);
        (fraction * self.max_episode_steps as f64).round() as u64
    }

    /// Half the arena side length.
    pub fn half_extent(&self) -> f32 {
        self.arena_size * 0.5
    }

    /// Divisor used to normalize positions; never zero.
    pub fn position_normalizer(&self) -> f32 {
        let half = self.half_extent();
        if half.is_finite() && half > f32::EPSILON {
            half
        } else {
            1.0
        }
    }

    /// Divisor used to normalize velocities; never zero.
    pub fn speed_normalizer(&self) -> f32 {
        let speed = self.movement.move_speed;
        if speed.is_finite() && speed > f32::EPSILON {
            speed
        } else {
            1.0
        }
    }

    /// Size of the larger team; sets the number of roster slots per observation.
    pub fn max_team_size(&self) -> usize {
        self.num_hiders.max(self.num_seekers)
    }

    pub fn num_agents(&self) -> usize {
        self.num_hiders + self.num_seekers
    }

    pub fn num_objects(&self) -> usize {
        self.num_boxes + self.num_ramps
    }

    /// Height above which an agent counts as having left the arena.
    pub fn ceiling_limit(&self) -> f32 {
        self.wall_height * self.bounds.ceiling_factor
    }
}
