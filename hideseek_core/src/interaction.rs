//! Grab, hold, lock and unlock.
//!
//! Objects move between three states:
//!
//! ```text
//!   Held <--grab/release--> Free <--lock/unlock--> Locked
//! ```
//!
//! Held and Locked never mix. Held objects are kinematic and follow their
//! holder; locked objects are kinematic and stay put until the locking team
//! unlocks them. No rewards are granted here.

use crate::config::InteractionConfig;
use crate::entity::{GrabbableObject, ObjectState, Roster};
use hideseek_env::{AgentId, BodyId, EnvError, ObjectId, PhysicsBackend, Pose, Team};
use nalgebra::Vector3;
use tracing::debug;

/// Result of a grab/release toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabOutcome {
    Grabbed(ObjectId),
    Released(ObjectId),
    /// Nothing in reach, or the agent is inactive
    Nothing,
}

/// Why a lock/unlock attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRejection {
    Inactive,
    /// The agent is carrying an object
    Holding,
    /// The agent locked or unlocked something too recently
    Cooldown,
    /// No lockable object in reach
    NoTarget,
    /// The object was locked by the other team
    WrongTeam,
    /// The object is still moving
    NotSettled,
}

/// Result of a lock/unlock toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked(ObjectId),
    Unlocked(ObjectId),
    Rejected(LockRejection),
}

/// The object interaction state machine.
pub struct InteractionSystem {
    config: InteractionConfig,

    /// Remaining lock cooldown per agent, in ticks
    cooldowns: Vec<u32>,

    /// Agent half height, used to find the holder's ground level
    agent_half_height: f32,

    /// Horizontal half extent of the playable floor
    arena_half_extent: f32,
}

impl InteractionSystem {
    pub fn new(config: InteractionConfig, num_agents: usize, agent_half_height: f32) -> Self {
        Self {
            config,
            cooldowns: vec![0; num_agents],
            agent_half_height,
            arena_half_extent: f32::INFINITY,
        }
    }

    /// Keeps carried objects inside `half` on x and z.
    pub fn with_arena_half_extent(mut self, half: f32) -> Self {
        self.arena_half_extent = half;
        self
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    /// Remaining lock cooldown of an agent.
    pub fn cooldown(&self, agent: AgentId) -> u32 {
        self.cooldowns.get(agent.index()).copied().unwrap_or(0)
    }

    /// Counts down every agent's lock cooldown by one tick.
    pub fn tick_cooldowns(&mut self) {
        for c in &mut self.cooldowns {
            *c = c.saturating_sub(1);
        }
    }

    /// Releases the held object, or grabs the nearest eligible one.
    pub fn try_grab_or_release<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &mut P,
        roster: &mut Roster,
        agent: AgentId,
    ) -> GrabOutcome {
        let Some(a) = roster.agent(agent) else {
            return GrabOutcome::Nothing;
        };
        if !a.active {
            return GrabOutcome::Nothing;
        }

        if let Some(object) = a.held_object {
            let impulse = a.velocity + a.pose.forward * self.config.throw_force;
            let throw = self.config.throw_force > 0.0;
            self.release(physics, roster, agent, object, throw.then_some(impulse));
            return GrabOutcome::Released(object);
        }

        let Some(object) = self.nearest_in_reach(roster, agent, |o| o.is_free()) else {
            return GrabOutcome::Nothing;
        };

        if let Some(o) = roster.object_mut(object) {
            o.state = ObjectState::Held { holder: agent };
            o.velocity = Vector3::zeros();
        }
        if let Some(a) = roster.agent_mut(agent) {
            a.held_object = Some(object);
        }
        absorb(physics.set_kinematic(BodyId::Object(object), true));

        debug!("{} grabbed {}", agent, object);
        GrabOutcome::Grabbed(object)
    }

    /// Locks the nearest free object, or unlocks the nearest own-team lock.
    pub fn try_lock_or_unlock<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &mut P,
        roster: &mut Roster,
        agent: AgentId,
    ) -> LockOutcome {
        let Some(a) = roster.agent(agent) else {
            return LockOutcome::Rejected(LockRejection::Inactive);
        };
        if !a.active {
            return LockOutcome::Rejected(LockRejection::Inactive);
        }
        if a.held_object.is_some() {
            return LockOutcome::Rejected(LockRejection::Holding);
        }
        if self.cooldown(agent) > 0 {
            return LockOutcome::Rejected(LockRejection::Cooldown);
        }
        let team = a.team;

        // Another team's lock in front must not hide a lockable object behind it
        let actionable = |o: &GrabbableObject| o.is_free() || o.locking_team() == Some(team);
        let Some(object) = self.nearest_in_reach(roster, agent, actionable) else {
            let blocked = self.nearest_in_reach(roster, agent, |o| o.is_locked()).is_some();
            let reason = if blocked {
                LockRejection::WrongTeam
            } else {
                LockRejection::NoTarget
            };
            return LockOutcome::Rejected(reason);
        };
        let Some(o) = roster.object_mut(object) else {
            return LockOutcome::Rejected(LockRejection::NoTarget);
        };

        let outcome = match o.state {
            ObjectState::Locked { team: locker } if locker == team => {
                o.state = ObjectState::Free;
                absorb(physics.set_kinematic(BodyId::Object(object), false));
                LockOutcome::Unlocked(object)
            }
            ObjectState::Locked { .. } => return LockOutcome::Rejected(LockRejection::WrongTeam),
            ObjectState::Free => {
                if !self.is_settled(o) {
                    return LockOutcome::Rejected(LockRejection::NotSettled);
                }
                o.state = ObjectState::Locked { team };
                o.velocity = Vector3::zeros();
                absorb(physics.set_kinematic(BodyId::Object(object), true));
                LockOutcome::Locked(object)
            }
            ObjectState::Held { .. } => return LockOutcome::Rejected(LockRejection::NoTarget),
        };

        if let Some(c) = self.cooldowns.get_mut(agent.index()) {
            *c = self.config.lock_cooldown_steps;
        }
        debug!("{} ({}) -> {:?}", agent, team, outcome);
        outcome
    }

    /// Moves every held object toward its carry point in front of the holder.
    pub fn update_held_objects<P: PhysicsBackend + ?Sized>(&mut self, physics: &mut P, roster: &mut Roster) {
        let smoothing = self.config.hold_smoothing.clamp(f32::EPSILON, 1.0);

        for index in 0..roster.objects.len() {
            let Some(holder) = roster.objects[index].holder() else {
                continue;
            };
            let Some(h) = roster.agent(holder) else {
                continue;
            };
            let holder_pose = h.pose;

            let object = &mut roster.objects[index];
            let ground = holder_pose.position.y - self.agent_half_height;
            let mut target = holder_pose.position + holder_pose.forward * self.config.hold_distance;
            target.y = ground + object.half_extents.y;
            let limit_x = (self.arena_half_extent - object.half_extents.x).max(0.0);
            let limit_z = (self.arena_half_extent - object.half_extents.z).max(0.0);
            target.x = target.x.clamp(-limit_x, limit_x);
            target.z = target.z.clamp(-limit_z, limit_z);

            let current = object.pose.position;
            let position = current + (target - current) * smoothing;
            let pose = Pose {
                position,
                forward: holder_pose.forward,
            };
            object.pose = pose;
            absorb(physics.set_pose(BodyId::Object(object.id), pose));
        }
    }

    /// Drops whatever `agent` is holding without a throw.
    pub fn release_agent<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &mut P,
        roster: &mut Roster,
        agent: AgentId,
    ) -> Option<ObjectId> {
        let object = roster.agent(agent)?.held_object?;
        self.release(physics, roster, agent, object, None);
        Some(object)
    }

    /// Returns every object to Free and clears all holders and cooldowns.
    pub fn release_all<P: PhysicsBackend + ?Sized>(&mut self, physics: &mut P, roster: &mut Roster) {
        for object in &mut roster.objects {
            if !object.is_free() {
                object.state = ObjectState::Free;
                absorb(physics.set_kinematic(BodyId::Object(object.id), false));
            }
        }
        for agent in &mut roster.agents {
            agent.held_object = None;
        }
        for c in &mut self.cooldowns {
            *c = 0;
        }
    }

    /// Checks that holder references agree in both directions.
    pub fn check_invariants(roster: &Roster) -> bool {
        let objects_ok = roster.objects.iter().all(|o| match o.holder() {
            Some(holder) => roster
                .agent(holder)
                .map_or(false, |a| a.held_object == Some(o.id)),
            None => true,
        });
        let agents_ok = roster.agents.iter().all(|a| match a.held_object {
            Some(object) => roster
                .object(object)
                .map_or(false, |o| o.holder() == Some(a.id)),
            None => true,
        });
        objects_ok && agents_ok
    }

    fn release<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &mut P,
        roster: &mut Roster,
        agent: AgentId,
        object: ObjectId,
        impulse: Option<Vector3<f32>>,
    ) {
        if let Some(a) = roster.agent_mut(agent) {
            a.held_object = None;
        }
        if let Some(o) = roster.object_mut(object) {
            if o.holder() == Some(agent) {
                o.state = ObjectState::Free;
            }
        }

        let body = BodyId::Object(object);
        absorb(physics.set_kinematic(body, false));
        if let Some(impulse) = impulse {
            absorb(physics.apply_impulse(body, impulse));
        }
        debug!("{} released {}", agent, object);
    }

    fn is_settled(&self, object: &GrabbableObject) -> bool {
        let v = object.velocity;
        let planar = (v.x * v.x + v.z * v.z).sqrt();
        v.y.abs() <= self.config.ground_tolerance && planar <= self.config.lock_max_speed
    }

    /// Nearest object within grab range and the forward cone that passes `filter`.
    fn nearest_in_reach(
        &self,
        roster: &Roster,
        agent: AgentId,
        filter: impl Fn(&GrabbableObject) -> bool,
    ) -> Option<ObjectId> {
        let a = roster.agent(agent)?;
        let origin = a.position();
        let forward = Vector3::new(a.pose.forward.x, 0.0, a.pose.forward.z);

        roster
            .objects
            .iter()
            .filter(|o| filter(o))
            .filter_map(|o| {
                let delta = o.position() - origin;
                let distance = delta.norm();
                if !distance.is_finite() || distance > self.config.grab_range {
                    return None;
                }
                let flat = Vector3::new(delta.x, 0.0, delta.z);
                if flat.norm() > 1e-6 && forward.norm() > 1e-6 {
                    let dot = forward.normalize().dot(&flat.normalize());
                    if dot < self.config.grab_cone_dot {
                        return None;
                    }
                }
                Some((o.id, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }
}

/// Physics command failures never stop the tick.
fn absorb(result: Result<(), EnvError>) {
    if let Err(e) = result {
        debug!("physics command ignored: {}", e);
    }
}

/// `Some(true)` if `team` locked `object`, `Some(false)` if the other team did.
pub fn locked_by(object: &GrabbableObject, team: Team) -> Option<bool> {
    object.locking_team().map(|t| t == team)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Roster;
    use approx::assert_relative_eq;
    use hideseek_env::{BodyDesc, KinematicWorld, LayerMask};

    const HIDER: AgentId = AgentId(0);
    const SEEKER: AgentId = AgentId(1);

    /// One hider, one seeker, one box 1.5 m in front of the hider.
    fn setup() -> (KinematicWorld, Roster, InteractionSystem) {
        let mut roster = Roster::new(1, 1, 1, 0, Vector3::repeat(0.75), Vector3::repeat(1.0));

        roster.agents[0].pose = Pose::at(Vector3::new(0.0, 0.5, 0.0));
        roster.agents[1].pose = Pose::at(Vector3::new(3.0, 0.5, 0.0));
        roster.objects[0].pose = Pose::at(Vector3::new(0.0, 0.75, 1.5));

        let world = physics_for(&roster);
        let system = InteractionSystem::new(InteractionConfig::default(), 2, 0.5);
        (world, roster, system)
    }

    fn physics_for(roster: &Roster) -> KinematicWorld {
        let mut world = KinematicWorld::new();
        for agent in &roster.agents {
            world.insert_body(
                agent.id.into(),
                BodyDesc {
                    half_extents: Vector3::repeat(0.5),
                    layer: LayerMask::AGENTS,
                    pose: agent.pose,
                },
            );
        }
        for object in &roster.objects {
            world.insert_body(
                object.id.into(),
                BodyDesc {
                    half_extents: object.half_extents,
                    layer: LayerMask::OBJECTS,
                    pose: object.pose,
                },
            );
        }
        world
    }

    #[test]
    fn test_grab_then_release() {
        let (mut world, mut roster, mut system) = setup();

        let outcome = system.try_grab_or_release(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, GrabOutcome::Grabbed(ObjectId(0)));
        assert_eq!(roster.objects[0].holder(), Some(HIDER));
        assert_eq!(roster.agents[0].held_object, Some(ObjectId(0)));
        assert!(world.is_kinematic(BodyId::Object(ObjectId(0))));
        assert!(InteractionSystem::check_invariants(&roster));

        let outcome = system.try_grab_or_release(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, GrabOutcome::Released(ObjectId(0)));
        assert!(roster.objects[0].is_free());
        assert!(!world.is_kinematic(BodyId::Object(ObjectId(0))));
        // Thrown forward
        assert!(world.velocity(BodyId::Object(ObjectId(0))).unwrap().z > 0.0);
    }

    #[test]
    fn test_object_behind_agent_not_grabbable() {
        let (mut world, mut roster, mut system) = setup();
        roster.agents[0].pose = Pose::with_yaw(Vector3::new(0.0, 0.5, 0.0), std::f32::consts::PI);

        let outcome = system.try_grab_or_release(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, GrabOutcome::Nothing);
    }

    #[test]
    fn test_second_agent_cannot_take_held_object() {
        let (mut world, mut roster, mut system) = setup();
        system.try_grab_or_release(&mut world, &mut roster, HIDER);

        roster.agents[1].pose = Pose::at(Vector3::new(0.0, 0.5, 0.5));
        let outcome = system.try_grab_or_release(&mut world, &mut roster, SEEKER);

        assert_eq!(outcome, GrabOutcome::Nothing);
        assert_eq!(roster.objects[0].holder(), Some(HIDER));
    }

    #[test]
    fn test_holding_agent_cannot_lock() {
        let (mut world, mut roster, mut system) = setup();
        system.try_grab_or_release(&mut world, &mut roster, HIDER);

        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, LockOutcome::Rejected(LockRejection::Holding));
        assert!(roster.objects[0].is_grabbed());
    }

    #[test]
    fn test_lock_cooldown_and_team_unlock() {
        let (mut world, mut roster, mut system) = setup();

        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, LockOutcome::Locked(ObjectId(0)));
        assert_eq!(roster.objects[0].locking_team(), Some(Team::Hider));

        // Cooldown blocks the immediate unlock
        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, LockOutcome::Rejected(LockRejection::Cooldown));

        // Locked objects cannot be grabbed
        roster.agents[1].pose = Pose::at(Vector3::new(0.0, 0.5, 0.5));
        assert_eq!(
            system.try_grab_or_release(&mut world, &mut roster, SEEKER),
            GrabOutcome::Nothing
        );

        // The other team cannot unlock
        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, SEEKER);
        assert_eq!(outcome, LockOutcome::Rejected(LockRejection::WrongTeam));

        for _ in 0..10 {
            system.tick_cooldowns();
        }
        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, LockOutcome::Unlocked(ObjectId(0)));
        assert!(roster.objects[0].is_free());
        assert_eq!(system.cooldown(HIDER), 10);
    }

    #[test]
    fn test_moving_object_cannot_be_locked() {
        let (mut world, mut roster, mut system) = setup();
        roster.objects[0].velocity = Vector3::new(1.0, 0.0, 0.0);

        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert_eq!(outcome, LockOutcome::Rejected(LockRejection::NotSettled));
        assert_eq!(system.cooldown(HIDER), 0);
    }

    #[test]
    fn test_held_object_follows_holder() {
        let (mut world, mut roster, mut system) = setup();
        system.try_grab_or_release(&mut world, &mut roster, HIDER);
        roster.agents[0].pose = Pose::at(Vector3::new(4.0, 0.5, 0.0));

        for _ in 0..100 {
            system.update_held_objects(&mut world, &mut roster);
        }

        let position = roster.objects[0].position();
        assert_relative_eq!(position.x, 4.0, epsilon = 1e-3);
        assert_relative_eq!(position.z, 1.5, epsilon = 1e-3);
        assert_relative_eq!(position.y, 0.75, epsilon = 1e-3);
        assert_eq!(world.pose(BodyId::Object(ObjectId(0))).unwrap().position, position);
    }

    #[test]
    fn test_held_object_stays_inside_arena() {
        let (mut world, mut roster, system) = setup();
        let mut system = system.with_arena_half_extent(12.5);
        system.try_grab_or_release(&mut world, &mut roster, HIDER);
        roster.agents[0].pose = Pose::with_yaw(Vector3::new(11.5, 0.5, 0.0), std::f32::consts::FRAC_PI_2);

        for _ in 0..100 {
            system.update_held_objects(&mut world, &mut roster);
            let position = roster.objects[0].position();
            assert!(position.x <= 12.5 - 0.75 + 1e-4, "carried box left the arena: {}", position.x);
        }

        let position = roster.objects[0].position();
        assert_relative_eq!(position.x, 11.75, epsilon = 1e-3);
        assert_relative_eq!(position.z, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_other_team_lock_does_not_hide_free_object() {
        let mut roster = Roster::new(1, 1, 2, 0, Vector3::repeat(0.75), Vector3::repeat(1.0));
        roster.agents[0].pose = Pose::at(Vector3::new(0.0, 0.5, 0.0));
        roster.agents[1].pose = Pose::at(Vector3::new(3.0, 0.5, 0.0));
        roster.objects[0].pose = Pose::at(Vector3::new(0.0, 0.75, 1.0));
        roster.objects[0].state = ObjectState::Locked { team: Team::Seeker };
        roster.objects[1].pose = Pose::at(Vector3::new(0.0, 0.75, 2.0));
        let mut world = physics_for(&roster);
        let mut system = InteractionSystem::new(InteractionConfig::default(), 2, 0.5);

        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);

        assert_eq!(outcome, LockOutcome::Locked(ObjectId(1)));
        assert_eq!(roster.objects[0].locking_team(), Some(Team::Seeker));
        assert_eq!(roster.objects[1].locking_team(), Some(Team::Hider));
    }

    #[test]
    fn test_only_other_team_lock_in_reach_is_wrong_team() {
        let (mut world, mut roster, mut system) = setup();
        roster.objects[0].state = ObjectState::Locked { team: Team::Seeker };

        let outcome = system.try_lock_or_unlock(&mut world, &mut roster, HIDER);

        assert_eq!(outcome, LockOutcome::Rejected(LockRejection::WrongTeam));
        assert_eq!(system.cooldown(HIDER), 0);
    }

    #[test]
    fn test_release_all_clears_everything() {
        let (mut world, mut roster, mut system) = setup();
        system.try_lock_or_unlock(&mut world, &mut roster, HIDER);
        assert!(system.cooldown(HIDER) > 0);

        system.release_all(&mut world, &mut roster);

        assert!(roster.objects.iter().all(|o| o.is_free()));
        assert!(roster.agents.iter().all(|a| a.held_object.is_none()));
        assert_eq!(system.cooldown(HIDER), 0);
        assert!(!world.is_kinematic(BodyId::Object(ObjectId(0))));
    }

    #[test]
    fn test_release_agent_has_no_throw() {
        let (mut world, mut roster, mut system) = setup();
        system.try_grab_or_release(&mut world, &mut roster, HIDER);

        let released = system.release_agent(&mut world, &mut roster, HIDER);

        assert_eq!(released, Some(ObjectId(0)));
        assert_eq!(world.velocity(BodyId::Object(ObjectId(0))), Some(Vector3::zeros()));
    }
}
