//! Hide & Seek Collaborator Boundary
//!
//! This crate defines everything the episode engine exchanges with the
//! outside world, so the engine itself stays free of any particular physics
//! engine or learning framework:
//! - **Handles**: `AgentId`, `ObjectId`, `BodyId` (stable integer indices)
//! - **Physics**: `PhysicsBackend` - occlusion rays, motion commands, pose read-back
//! - **Policy**: `Policy` - observation in, action out, episode-end notification
//!
//! `KinematicWorld` is a small deterministic `PhysicsBackend` used by the
//! harness and by tests.
//!
//! # Example
//!
//! ```ignore
//! use hideseek_env::{KinematicWorld, LayerMask, PhysicsBackend};
//! use nalgebra::Vector3;
//!
//! let world = KinematicWorld::new();
//! let hit = world.raycast(&Vector3::zeros(), &Vector3::z(), 20.0, LayerMask::OCCLUDERS);
//! ```

mod error;
mod kinematic;
mod physics;
mod policy;
mod types;

pub use error::EnvError;
pub use kinematic::KinematicWorld;
pub use physics::{BodyDesc, PhysicsBackend};
pub use policy::Policy;
pub use types::{
    Aabb, AgentId, BodyId, EpisodeOutcome, LayerMask, ObjectId, Pose, RayHit, Team,
};
