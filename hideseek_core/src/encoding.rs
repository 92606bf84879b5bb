//! Observation and action encoding.
//!
//! Observations are flat `f32` vectors with a fixed length per arena, so
//! every agent on both teams can share one policy input shape:
//!
//! | block     | size                    | contents |
//! |-----------|-------------------------|----------|
//! | self      | 10                      | position / half extent, forward, velocity / max speed, holding |
//! | episode   | 3                       | grace flag, elapsed fraction, team flag (seeker = 1) |
//! | teammates | 8 × (max team size − 1) | relative position / half extent, forward, active, visible |
//! | opponents | 8 × max team size       | same; position and forward zeroed unless visible |
//! | objects   | 7 × object count        | relative position / half extent, grabbed, locked, locked by my team, is ramp |
//!
//! Actions are five channels: strafe, forward, yaw (continuous, clamped to
//! [-1, 1]) and grab, lock (pressed when > 0.5).

use crate::config::ArenaConfig;
use crate::entity::{Agent, ObjectKind, Roster};
use crate::visibility::Sightings;
use hideseek_env::{AgentId, Pose, Team};
use nalgebra::Vector3;

pub const SELF_SIZE: usize = 10;
pub const EPISODE_SIZE: usize = 3;
pub const SLOT_SIZE: usize = 8;
pub const OBJECT_SIZE: usize = 7;

/// Number of action channels.
pub const ACTION_SIZE: usize = 5;

/// Binary channels above this value count as pressed.
pub const PRESS_THRESHOLD: f32 = 0.5;

/// Offsets of the observation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationLayout {
    pub teammate_slots: usize,
    pub opponent_slots: usize,
    pub object_slots: usize,
}

impl ObservationLayout {
    pub fn new(max_team_size: usize, num_objects: usize) -> Self {
        Self {
            teammate_slots: max_team_size.saturating_sub(1),
            opponent_slots: max_team_size,
            object_slots: num_objects,
        }
    }

    pub fn from_config(config: &ArenaConfig) -> Self {
        Self::new(config.max_team_size(), config.num_objects())
    }

    pub fn self_offset(&self) -> usize {
        0
    }

    pub fn episode_offset(&self) -> usize {
        SELF_SIZE
    }

    pub fn teammate_offset(&self, slot: usize) -> usize {
        SELF_SIZE + EPISODE_SIZE + slot * SLOT_SIZE
    }

    pub fn opponent_offset(&self, slot: usize) -> usize {
        self.teammate_offset(self.teammate_slots) + slot * SLOT_SIZE
    }

    pub fn object_offset(&self, slot: usize) -> usize {
        self.opponent_offset(self.opponent_slots) + slot * OBJECT_SIZE
    }

    /// Total observation length.
    pub fn len(&self) -> usize {
        self.object_offset(self.object_slots)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Episode-level inputs to an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeView {
    pub is_grace_period: bool,

    /// current step / max steps, in [0, 1]
    pub elapsed_fraction: f32,
}

/// Builds observation vectors.
#[derive(Debug, Clone)]
pub struct ObservationEncoder {
    layout: ObservationLayout,
    position_scale: f32,
    speed_scale: f32,
}

impl ObservationEncoder {
    pub fn new(config: &ArenaConfig) -> Self {
        Self {
            layout: ObservationLayout::from_config(config),
            position_scale: 1.0 / config.position_normalizer(),
            speed_scale: 1.0 / config.speed_normalizer(),
        }
    }

    pub fn layout(&self) -> &ObservationLayout {
        &self.layout
    }

    /// Encodes the observation of `agent`. Unknown agents get all zeros.
    pub fn encode(
        &self,
        agent: AgentId,
        roster: &Roster,
        sightings: &Sightings,
        episode: EpisodeView,
    ) -> Vec<f32> {
        let mut obs = vec![0.0; self.layout.len()];
        let Some(me) = roster.agent(agent) else {
            return obs;
        };
        let origin = me.position();

        // Self
        let o = self.layout.self_offset();
        write3(&mut obs, o, &(origin * self.position_scale));
        write3(&mut obs, o + 3, &me.pose.forward);
        write3(&mut obs, o + 6, &(me.velocity * self.speed_scale));
        obs[o + 9] = flag(me.held_object.is_some());

        // Episode
        let o = self.layout.episode_offset();
        obs[o] = flag(episode.is_grace_period);
        obs[o + 1] = episode.elapsed_fraction.clamp(0.0, 1.0);
        obs[o + 2] = flag(me.team == Team::Seeker);

        // Teammates, in team order, skipping self
        let teammates = roster.team(me.team).filter(|a| a.id != me.id);
        for (slot, mate) in teammates.take(self.layout.teammate_slots).enumerate() {
            let o = self.layout.teammate_offset(slot);
            self.write_slot(&mut obs, o, &origin, mate, true);
        }

        // Opponents, hidden unless currently in sight
        let opponents = roster.team(me.team.opponent());
        for (slot, other) in opponents.take(self.layout.opponent_slots).enumerate() {
            let o = self.layout.opponent_offset(slot);
            let visible = sightings.sees(me.id, other.id);
            self.write_slot(&mut obs, o, &origin, other, visible);
        }

        // Objects
        for (slot, object) in roster.objects.iter().take(self.layout.object_slots).enumerate() {
            let o = self.layout.object_offset(slot);
            write3(&mut obs, o, &((object.position() - origin) * self.position_scale));
            obs[o + 3] = flag(object.is_grabbed());
            obs[o + 4] = flag(object.is_locked());
            obs[o + 5] = flag(object.locking_team() == Some(me.team));
            obs[o + 6] = flag(object.kind == ObjectKind::Ramp);
        }

        for v in &mut obs {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        obs
    }

    fn write_slot(&self, obs: &mut [f32], o: usize, origin: &Vector3<f32>, other: &Agent, visible: bool) {
        if visible {
            write3(obs, o, &((other.position() - origin) * self.position_scale));
            write3(obs, o + 3, &other.pose.forward);
        }
        obs[o + 6] = flag(other.active);
        obs[o + 7] = flag(visible && other.active);
    }
}

fn write3(obs: &mut [f32], offset: usize, v: &Vector3<f32>) {
    obs[offset..offset + 3].copy_from_slice(v.as_slice());
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// A decoded action.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentAction {
    /// Rightward motion in [-1, 1]
    pub strafe: f32,

    /// Forward motion in [-1, 1]
    pub forward: f32,

    /// Yaw rate in [-1, 1], positive turns right
    pub yaw: f32,

    pub grab: bool,
    pub lock: bool,
}

impl AgentAction {
    /// Decodes a raw action vector. Never fails: missing channels read as
    /// zero, NaN reads as zero, and values are clamped.
    pub fn decode(raw: &[f32]) -> Self {
        let channel = |i: usize| raw.get(i).copied().unwrap_or(0.0);
        let axis = |i: usize| {
            let v = channel(i);
            if v.is_nan() {
                0.0
            } else {
                v.clamp(-1.0, 1.0)
            }
        };
        Self {
            strafe: axis(0),
            forward: axis(1),
            yaw: axis(2),
            grab: channel(3) > PRESS_THRESHOLD,
            lock: channel(4) > PRESS_THRESHOLD,
        }
    }

    /// Encodes back to the raw channel layout.
    pub fn to_vec(&self) -> Vec<f32> {
        vec![
            self.strafe,
            self.forward,
            self.yaw,
            flag(self.grab),
            flag(self.lock),
        ]
    }

    /// Planar velocity in world coordinates for an agent at `pose`.
    ///
    /// The magnitude never exceeds `move_speed`.
    pub fn planar_velocity(&self, pose: &Pose, move_speed: f32) -> Vector3<f32> {
        let forward = Vector3::new(pose.forward.x, 0.0, pose.forward.z);
        let direction = pose.right() * self.strafe + forward * self.forward;
        let velocity = direction * move_speed;
        let speed = velocity.norm();
        if speed > move_speed && speed > 0.0 {
            velocity * (move_speed / speed)
        } else {
            velocity
        }
    }

    /// Pose after turning for `dt` seconds at up to `rotation_speed_deg` °/s.
    pub fn rotated(&self, pose: &Pose, rotation_speed_deg: f32, dt: f32) -> Pose {
        let delta = self.yaw * rotation_speed_deg.to_radians() * dt;
        Pose::with_yaw(pose.position, pose.yaw() + delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisibilityConfig;
    use crate::entity::ObjectState;
    use crate::visibility::VisibilityEngine;
    use approx::assert_relative_eq;
    use hideseek_env::KinematicWorld;
    use proptest::prelude::*;

    fn arena_config() -> ArenaConfig {
        ArenaConfig {
            num_hiders: 2,
            num_seekers: 2,
            num_boxes: 2,
            num_ramps: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_length() {
        let layout = ObservationLayout::from_config(&arena_config());
        // 10 + 3 + 8 * 1 + 8 * 2 + 7 * 3
        assert_eq!(layout.len(), 58);
        assert_eq!(layout.opponent_offset(0), 21);
        assert_eq!(layout.object_offset(0), 37);
    }

    #[test]
    fn test_uneven_teams_share_length() {
        let config = ArenaConfig {
            num_hiders: 3,
            num_seekers: 1,
            ..arena_config()
        };
        let mut roster = Roster::new(3, 1, 2, 1, Vector3::repeat(0.75), Vector3::new(1.0, 0.5, 1.5));
        for (i, a) in roster.agents.iter_mut().enumerate() {
            a.pose = Pose::at(Vector3::new(i as f32 * 2.0, 0.5, 0.0));
        }
        let encoder = ObservationEncoder::new(&config);
        let view = EpisodeView {
            is_grace_period: false,
            elapsed_fraction: 0.5,
        };

        let hider = encoder.encode(AgentId(0), &roster, &Sightings::empty(4), view);
        let seeker = encoder.encode(AgentId(3), &roster, &Sightings::empty(4), view);
        assert_eq!(hider.len(), seeker.len());
        assert_eq!(hider.len(), encoder.layout().len());
    }

    #[test]
    fn test_opponent_hidden_unless_visible() {
        let config = arena_config();
        let mut roster = Roster::new(2, 2, 2, 1, Vector3::repeat(0.75), Vector3::new(1.0, 0.5, 1.5));
        roster.agents[0].pose = Pose::at(Vector3::new(0.0, 0.5, 5.0));
        roster.agents[1].pose = Pose::at(Vector3::new(0.0, 0.5, -5.0));
        roster.agents[2].pose = Pose::at(Vector3::new(0.0, 0.5, 0.0));
        roster.agents[3].pose = Pose::at(Vector3::new(5.0, 0.5, -8.0));
        roster.objects[0].state = ObjectState::Locked { team: Team::Seeker };

        let world = KinematicWorld::new();
        let mut vis = VisibilityEngine::new(VisibilityConfig::default());
        let sightings = vis.sightings(&world, &roster.agents, 0);

        let encoder = ObservationEncoder::new(&config);
        let layout = *encoder.layout();
        let view = EpisodeView {
            is_grace_period: true,
            elapsed_fraction: 0.1,
        };
        let obs = encoder.encode(AgentId(2), &roster, &sightings, view);

        // Episode block
        assert_eq!(obs[layout.episode_offset()], 1.0);
        assert_eq!(obs[layout.episode_offset() + 2], 1.0);

        // Hider 0 is in front: visible with relative position
        let o = layout.opponent_offset(0);
        assert_relative_eq!(obs[o + 2], 5.0 / 12.5);
        assert_eq!(obs[o + 6], 1.0);
        assert_eq!(obs[o + 7], 1.0);

        // Hider 1 is behind: zeroed, active, not visible
        let o = layout.opponent_offset(1);
        assert_eq!(&obs[o..o + 6], &[0.0; 6]);
        assert_eq!(obs[o + 6], 1.0);
        assert_eq!(obs[o + 7], 0.0);

        // Teammate slot is always filled
        let o = layout.teammate_offset(0);
        assert_relative_eq!(obs[o], 5.0 / 12.5);
        assert_eq!(obs[o + 7], 1.0);

        // Seeker-locked box reads as locked by my team
        let o = layout.object_offset(0);
        assert_eq!(obs[o + 4], 1.0);
        assert_eq!(obs[o + 5], 1.0);
        assert_eq!(obs[layout.object_offset(2) + 6], 1.0);
    }

    #[test]
    fn test_decode_zero_fills_and_clamps() {
        let action = AgentAction::decode(&[2.0, f32::NAN]);
        assert_eq!(action.strafe, 1.0);
        assert_eq!(action.forward, 0.0);
        assert_eq!(action.yaw, 0.0);
        assert!(!action.grab && !action.lock);

        let action = AgentAction::decode(&[0.0, -0.5, 0.25, 0.6, 0.5]);
        assert_eq!(action.forward, -0.5);
        assert!(action.grab);
        assert!(!action.lock);
    }

    #[test]
    fn test_rotation_rate() {
        let action = AgentAction {
            yaw: 1.0,
            ..Default::default()
        };
        let pose = Pose::at(Vector3::zeros());
        let turned = action.rotated(&pose, 180.0, 0.5);
        assert_relative_eq!(turned.yaw(), std::f32::consts::FRAC_PI_2, epsilon = 1e-5);
    }

    proptest! {
        #[test]
        fn test_decoded_action_always_bounded(raw in proptest::collection::vec(any::<f32>(), 0..8)) {
            let action = AgentAction::decode(&raw);
            for v in [action.strafe, action.forward, action.yaw] {
                prop_assert!(v.is_finite());
                prop_assert!((-1.0..=1.0).contains(&v));
            }

            let pose = Pose::with_yaw(Vector3::zeros(), 0.3);
            let velocity = action.planar_velocity(&pose, 5.0);
            prop_assert!(velocity.norm() <= 5.0 + 1e-4);
            prop_assert_eq!(velocity.y, 0.0);
        }
    }
}
