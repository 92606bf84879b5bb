//! Reference implementation of `PhysicsBackend`.

use crate::error::EnvError;
use crate::physics::{BodyDesc, PhysicsBackend};
use crate::types::{Aabb, BodyId, LayerMask, Pose, RayHit};
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// A registered dynamic body.
#[derive(Debug, Clone)]
struct Body {
    half_extents: Vector3<f32>,
    layer: LayerMask,
    pose: Pose,
    velocity: Vector3<f32>,
    kinematic: bool,
    enabled: bool,
}

impl Body {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(self.pose.position, self.half_extents)
    }
}

/// Deterministic kinematic world with AABB bodies.
///
/// - Gravity pulls non-kinematic bodies down onto a ground plane at y = 0
/// - Bodies are pushed out of static occluders along the shallowest axis
/// - Horizontal velocity decays with linear damping
/// - Body-body contacts are not resolved
///
/// A body whose bottom is already below the ground plane at the start of a
/// step is not caught by it; it keeps falling. This is how tunnelling through
/// the floor shows up to the engine's bounds recovery.
pub struct KinematicWorld {
    /// Bodies keyed by handle (ordered for deterministic iteration)
    bodies: BTreeMap<BodyId, Body>,

    /// Immovable geometry
    occluders: Vec<Aabb>,

    /// Downward acceleration in m/s²
    gravity: f32,

    /// Horizontal velocity decay per second
    damping: f32,
}

impl KinematicWorld {
    /// Creates an empty world with default gravity and damping.
    pub fn new() -> Self {
        Self {
            bodies: BTreeMap::new(),
            occluders: Vec::new(),
            gravity: 9.81,
            damping: 4.0,
        }
    }

    /// Sets gravity.
    pub fn with_gravity(mut self, gravity: f32) -> Self {
        self.gravity = gravity;
        self
    }

    /// Sets horizontal damping.
    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping.max(0.0);
        self
    }

    /// Returns the static occluders.
    pub fn occluders(&self) -> &[Aabb] {
        &self.occluders
    }

    /// Returns the number of registered bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Returns true if the body is registered and enabled.
    pub fn is_enabled(&self, id: BodyId) -> bool {
        self.bodies.get(&id).map(|b| b.enabled).unwrap_or(false)
    }

    /// Returns true if the body is registered and kinematic.
    pub fn is_kinematic(&self, id: BodyId) -> bool {
        self.bodies.get(&id).map(|b| b.kinematic).unwrap_or(false)
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut Body, EnvError> {
        self.bodies.get_mut(&id).ok_or(EnvError::UnknownBody(id))
    }

    /// Pushes `body` out of every occluder it overlaps.
    fn resolve_static(occluders: &[Aabb], body: &mut Body) {
        for occluder in occluders {
            let bounds = body.bounds();
            if !bounds.intersects(occluder) {
                continue;
            }

            // Shallowest penetration axis, with the sign that separates
            let mut best_axis = 0;
            let mut best_push = f32::MAX;
            for axis in 0..3 {
                let push_pos = occluder.max[axis] - bounds.min[axis];
                let push_neg = occluder.min[axis] - bounds.max[axis];
                let push = if push_pos.abs() < push_neg.abs() { push_pos } else { push_neg };
                if push.abs() < best_push.abs() {
                    best_push = push;
                    best_axis = axis;
                }
            }

            body.pose.position[best_axis] += best_push;
            if body.velocity[best_axis] * best_push < 0.0 {
                body.velocity[best_axis] = 0.0;
            }
        }
    }
}

impl Default for KinematicWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn check_finite(id: BodyId, v: &Vector3<f32>) -> Result<(), EnvError> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(EnvError::invalid(id, "non-finite vector"))
    }
}

impl PhysicsBackend for KinematicWorld {
    fn insert_body(&mut self, id: BodyId, desc: BodyDesc) {
        self.bodies.insert(
            id,
            Body {
                half_extents: desc.half_extents,
                layer: desc.layer,
                pose: desc.pose,
                velocity: Vector3::zeros(),
                kinematic: false,
                enabled: true,
            },
        );
    }

    fn add_static_occluder(&mut self, aabb: Aabb) {
        self.occluders.push(aabb);
    }

    fn raycast(
        &self,
        origin: &Vector3<f32>,
        direction: &Vector3<f32>,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<RayHit> {
        let mut nearest: Option<RayHit> = None;
        let mut consider = |distance: f32, body: Option<BodyId>| {
            if nearest.map_or(true, |hit| distance < hit.distance) {
                nearest = Some(RayHit { distance, body });
            }
        };

        if mask.intersects(LayerMask::STATIC) {
            for occluder in &self.occluders {
                if let Some(t) = occluder.ray_entry(origin, direction, max_distance) {
                    consider(t, None);
                }
            }
        }

        for (id, body) in &self.bodies {
            if !body.enabled || !mask.intersects(body.layer) {
                continue;
            }
            if let Some(t) = body.bounds().ray_entry(origin, direction, max_distance) {
                consider(t, Some(*id));
            }
        }

        nearest
    }

    fn pose(&self, id: BodyId) -> Option<Pose> {
        self.bodies.get(&id).map(|b| b.pose)
    }

    fn velocity(&self, id: BodyId) -> Option<Vector3<f32>> {
        self.bodies.get(&id).map(|b| b.velocity)
    }

    fn set_velocity(&mut self, id: BodyId, velocity: Vector3<f32>) -> Result<(), EnvError> {
        check_finite(id, &velocity)?;
        let body = self.body_mut(id)?;
        if !body.enabled {
            return Err(EnvError::BodyDisabled(id));
        }
        body.velocity = velocity;
        Ok(())
    }

    fn apply_impulse(&mut self, id: BodyId, impulse: Vector3<f32>) -> Result<(), EnvError> {
        check_finite(id, &impulse)?;
        let body = self.body_mut(id)?;
        if !body.enabled {
            return Err(EnvError::BodyDisabled(id));
        }
        body.velocity += impulse;
        Ok(())
    }

    fn set_pose(&mut self, id: BodyId, pose: Pose) -> Result<(), EnvError> {
        check_finite(id, &pose.position)?;
        check_finite(id, &pose.forward)?;
        let body = self.body_mut(id)?;
        body.pose = pose;
        Ok(())
    }

    fn set_kinematic(&mut self, id: BodyId, kinematic: bool) -> Result<(), EnvError> {
        let body = self.body_mut(id)?;
        body.kinematic = kinematic;
        if kinematic {
            body.velocity = Vector3::zeros();
        }
        Ok(())
    }

    fn set_enabled(&mut self, id: BodyId, enabled: bool) -> Result<(), EnvError> {
        let body = self.body_mut(id)?;
        body.enabled = enabled;
        if !enabled {
            body.velocity = Vector3::zeros();
        }
        Ok(())
    }

    fn step(&mut self, dt: f32) {
        let decay = (1.0 - self.damping * dt).max(0.0);

        for body in self.bodies.values_mut() {
            if !body.enabled || body.kinematic {
                continue;
            }

            let was_grounded = body.pose.position.y - body.half_extents.y >= -1e-4;

            body.velocity.y -= self.gravity * dt;
            body.pose.position += body.velocity * dt;

            Self::resolve_static(&self.occluders, body);

            let bottom = body.pose.position.y - body.half_extents.y;
            if was_grounded && bottom < 0.0 {
                body.pose.position.y = body.half_extents.y;
                body.velocity.y = body.velocity.y.max(0.0);
            }

            body.velocity.x *= decay;
            body.velocity.z *= decay;
        }
    }
}
