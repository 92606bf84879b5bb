//! Agents and grabbable objects owned by an arena.

use hideseek_env::{AgentId, ObjectId, Pose, Team};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A player in the arena.
///
/// Created once when the arena is built and reset at every episode boundary.
/// Capture deactivates an agent for the rest of the episode; it is never
/// removed from the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable handle (index into the roster)
    pub id: AgentId,

    pub team: Team,

    /// Index within the team
    pub team_index: usize,

    /// Pose as last read back from physics
    pub pose: Pose,

    /// Velocity as last read back from physics
    pub velocity: Vector3<f32>,

    /// Inactive agents are ignored by visibility, rewards and capture
    pub active: bool,

    /// Frozen agents ignore movement actions (seekers during grace)
    pub frozen: bool,

    /// Object currently carried, if any
    pub held_object: Option<ObjectId>,

    /// Reward accumulated during the current tick
    pub reward: f32,

    /// Reward accumulated since the episode started
    pub cumulative_reward: f32,
}

impl Agent {
    pub fn new(id: AgentId, team: Team, team_index: usize) -> Self {
        Self {
            id,
            team,
            team_index,
            pose: Pose::default(),
            velocity: Vector3::zeros(),
            active: true,
            frozen: false,
            held_object: None,
            reward: 0.0,
            cumulative_reward: 0.0,
        }
    }

    /// Adds to both the per-tick and the cumulative reward.
    pub fn add_reward(&mut self, amount: f32) {
        if amount.is_finite() {
            self.reward += amount;
            self.cumulative_reward += amount;
        }
    }

    pub fn position(&self) -> Vector3<f32> {
        self.pose.position
    }

    /// Returns the agent to its episode-start state (pose is set separately).
    pub fn reset(&mut self) {
        self.velocity = Vector3::zeros();
        self.active = true;
        self.frozen = false;
        self.held_object = None;
        self.reward = 0.0;
        self.cumulative_reward = 0.0;
    }
}

/// Kind of grabbable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Box,
    Ramp,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Box => "box",
            ObjectKind::Ramp => "ramp",
        }
    }
}

/// Interaction state of an object.
///
/// Held and Locked are separate variants, so an object can never be both,
/// and a held object has exactly one holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    Free,
    Held { holder: AgentId },
    Locked { team: Team },
}

/// A box or ramp agents can carry and lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrabbableObject {
    pub id: ObjectId,
    pub kind: ObjectKind,

    /// Pose as last read back from physics
    pub pose: Pose,

    /// Velocity as last read back from physics
    pub velocity: Vector3<f32>,

    pub half_extents: Vector3<f32>,

    pub state: ObjectState,
}

impl GrabbableObject {
    pub fn new(id: ObjectId, kind: ObjectKind, half_extents: Vector3<f32>) -> Self {
        Self {
            id,
            kind,
            pose: Pose::default(),
            velocity: Vector3::zeros(),
            half_extents,
            state: ObjectState::Free,
        }
    }

    pub fn is_grabbed(&self) -> bool {
        matches!(self.state, ObjectState::Held { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, ObjectState::Locked { .. })
    }

    pub fn is_free(&self) -> bool {
        self.state == ObjectState::Free
    }

    /// Team that locked the object; `None` unless locked.
    pub fn locking_team(&self) -> Option<Team> {
        match self.state {
            ObjectState::Locked { team } => Some(team),
            _ => None,
        }
    }

    /// Agent carrying the object; `None` unless held.
    pub fn holder(&self) -> Option<AgentId> {
        match self.state {
            ObjectState::Held { holder } => Some(holder),
            _ => None,
        }
    }

    pub fn position(&self) -> Vector3<f32> {
        self.pose.position
    }
}

/// All agents and objects of one arena, indexed by handle.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// Hiders first, then seekers
    pub agents: Vec<Agent>,

    /// Boxes first, then ramps
    pub objects: Vec<GrabbableObject>,
}

impl Roster {
    /// Builds the roster for the given team sizes and object counts.
    pub fn new(
        num_hiders: usize,
        num_seekers: usize,
        num_boxes: usize,
        num_ramps: usize,
        box_half_extents: Vector3<f32>,
        ramp_half_extents: Vector3<f32>,
    ) -> Self {
        let mut agents = Vec::with_capacity(num_hiders + num_seekers);
        for i in 0..num_hiders {
            agents.push(Agent::new(AgentId(agents.len() as u32), Team::Hider, i));
        }
        for i in 0..num_seekers {
            agents.push(Agent::new(AgentId(agents.len() as u32), Team::Seeker, i));
        }

        let mut objects = Vec::with_capacity(num_boxes + num_ramps);
        for _ in 0..num_boxes {
            let id = ObjectId(objects.len() as u32);
            objects.push(GrabbableObject::new(id, ObjectKind::Box, box_half_extents));
        }
        for _ in 0..num_ramps {
            let id = ObjectId(objects.len() as u32);
            objects.push(GrabbableObject::new(id, ObjectKind::Ramp, ramp_half_extents));
        }

        Self { agents, objects }
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.index())
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id.index())
    }

    pub fn object(&self, id: ObjectId) -> Option<&GrabbableObject> {
        self.objects.get(id.index())
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut GrabbableObject> {
        self.objects.get_mut(id.index())
    }

    /// Iterates over the agents of one team.
    pub fn team(&self, team: Team) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(move |a| a.team == team)
    }

    /// Iterates over the active agents of one team.
    pub fn active(&self, team: Team) -> impl Iterator<Item = &Agent> {
        self.team(team).filter(|a| a.active)
    }

    pub fn active_count(&self, team: Team) -> usize {
        self.active(team).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::new(2, 3, 2, 1, Vector3::repeat(0.75), Vector3::new(1.0, 0.5, 1.5))
    }

    #[test]
    fn test_roster_layout() {
        let roster = roster();
        assert_eq!(roster.agents.len(), 5);
        assert_eq!(roster.team(Team::Hider).count(), 2);
        assert_eq!(roster.team(Team::Seeker).count(), 3);

        for (i, agent) in roster.agents.iter().enumerate() {
            assert_eq!(agent.id.index(), i);
        }
        assert_eq!(roster.agents[2].team, Team::Seeker);
        assert_eq!(roster.agents[2].team_index, 0);

        assert_eq!(roster.objects[2].kind, ObjectKind::Ramp);
    }

    #[test]
    fn test_object_state_accessors() {
        let mut roster = roster();
        let object = &mut roster.objects[0];
        assert!(object.is_free());

        object.state = ObjectState::Held { holder: AgentId(1) };
        assert!(object.is_grabbed());
        assert!(!object.is_locked());
        assert_eq!(object.holder(), Some(AgentId(1)));
        assert_eq!(object.locking_team(), None);

        object.state = ObjectState::Locked { team: Team::Hider };
        assert!(!object.is_grabbed());
        assert_eq!(object.locking_team(), Some(Team::Hider));
        assert_eq!(object.holder(), None);
    }

    #[test]
    fn test_agent_reward_ignores_non_finite() {
        let mut agent = Agent::new(AgentId(0), Team::Hider, 0);
        agent.add_reward(0.5);
        agent.add_reward(f32::NAN);
        assert_eq!(agent.cumulative_reward, 0.5);

        agent.reset();
        assert_eq!(agent.cumulative_reward, 0.0);
        assert!(agent.active);
    }
}
