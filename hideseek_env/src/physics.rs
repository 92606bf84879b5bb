//! Physics collaborator abstraction.

use crate::error::EnvError;
use crate::types::{Aabb, BodyId, LayerMask, Pose, RayHit};
use nalgebra::Vector3;

/// Shape and layer of a dynamic body at registration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    /// Half extents of the body's bounding box
    pub half_extents: Vector3<f32>,

    /// Layer used to filter ray queries
    pub layer: LayerMask,

    /// Initial pose
    pub pose: Pose,
}

/// The queries and commands the engine issues to a physics engine.
///
/// The engine never integrates dynamics itself. Each tick it reads poses
/// back, issues velocity/pose commands, calls `step`, and casts occlusion
/// rays. Implementations decide how collisions are resolved.
///
/// # Implementations
///
/// - **Reference**: `KinematicWorld` - AABB bodies, gravity, ground plane
/// - **External**: adapters over a full rigid-body engine
///
/// # Determinism
///
/// Given the same command sequence an implementation must produce the same
/// poses and the same ray results; the engine's reproducibility depends on it.
pub trait PhysicsBackend: Send {
    /// Registers (or re-registers) a dynamic body.
    fn insert_body(&mut self, id: BodyId, desc: BodyDesc);

    /// Adds immovable geometry to the `STATIC` layer.
    fn add_static_occluder(&mut self, aabb: Aabb);

    /// Casts a ray and returns the nearest hit within `max_distance`.
    ///
    /// # Arguments
    /// * `origin` - Ray start point
    /// * `direction` - Unit direction
    /// * `max_distance` - Query length
    /// * `mask` - Layers the ray can hit
    fn raycast(
        &self,
        origin: &Vector3<f32>,
        direction: &Vector3<f32>,
        max_distance: f32,
        mask: LayerMask,
    ) -> Option<RayHit>;

    /// Reads back a body's pose.
    fn pose(&self, id: BodyId) -> Option<Pose>;

    /// Reads back a body's linear velocity.
    fn velocity(&self, id: BodyId) -> Option<Vector3<f32>>;

    /// Sets a body's linear velocity.
    fn set_velocity(&mut self, id: BodyId, velocity: Vector3<f32>) -> Result<(), EnvError>;

    /// Adds an instantaneous velocity change (unit mass).
    fn apply_impulse(&mut self, id: BodyId, impulse: Vector3<f32>) -> Result<(), EnvError>;

    /// Moves a body to a pose without sweeping.
    fn set_pose(&mut self, id: BodyId, pose: Pose) -> Result<(), EnvError>;

    /// Kinematic bodies ignore gravity and keep their pose until commanded.
    fn set_kinematic(&mut self, id: BodyId, kinematic: bool) -> Result<(), EnvError>;

    /// Disabled bodies neither move nor block rays.
    fn set_enabled(&mut self, id: BodyId, enabled: bool) -> Result<(), EnvError>;

    /// Integrates one fixed step of `dt` seconds.
    fn step(&mut self, dt: f32);
}
