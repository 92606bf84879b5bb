//! Common types shared by the engine and its collaborators.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Team membership of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Rewarded for staying out of sight
    Hider,
    /// Rewarded for keeping hiders in sight
    Seeker,
}

impl Team {
    /// Returns the other team.
    pub fn opponent(self) -> Self {
        match self {
            Team::Hider => Team::Seeker,
            Team::Seeker => Team::Hider,
        }
    }

    /// Returns a short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Team::Hider => "hider",
            Team::Seeker => "seeker",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Stable handle of an agent inside one arena.
///
/// The value is the index into the arena's agent table. Handles are never
/// reused or invalidated during the arena's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Returns the table index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Stable handle of a grabbable object inside one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Returns the table index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Identifies a dynamic body registered with the physics collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BodyId {
    Agent(AgentId),
    Object(ObjectId),
}

impl From<AgentId> for BodyId {
    fn from(id: AgentId) -> Self {
        BodyId::Agent(id)
    }
}

impl From<ObjectId> for BodyId {
    fn from(id: ObjectId) -> Self {
        BodyId::Object(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyId::Agent(id) => write!(f, "{}", id),
            BodyId::Object(id) => write!(f, "{}", id),
        }
    }
}

/// Position plus horizontal facing.
///
/// `forward` is kept unit-length and flat (y = 0); the engine only rotates
/// bodies about the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Body origin in arena coordinates (y up)
    pub position: Vector3<f32>,

    /// Unit facing direction on the XZ plane
    pub forward: Vector3<f32>,
}

impl Pose {
    /// Creates a pose facing +Z.
    pub fn at(position: Vector3<f32>) -> Self {
        Self {
            position,
            forward: Vector3::z(),
        }
    }

    /// Creates a pose from a position and a yaw angle in radians.
    ///
    /// Yaw 0 faces +Z, positive yaw turns toward +X.
    pub fn with_yaw(position: Vector3<f32>, yaw: f32) -> Self {
        Self {
            position,
            forward: Vector3::new(yaw.sin(), 0.0, yaw.cos()),
        }
    }

    /// Returns the yaw angle of `forward` in radians.
    pub fn yaw(&self) -> f32 {
        self.forward.x.atan2(self.forward.z)
    }

    /// Returns the unit vector pointing to the right of `forward`.
    pub fn right(&self) -> Vector3<f32> {
        Vector3::new(self.forward.z, 0.0, -self.forward.x)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::at(Vector3::zeros())
    }
}

/// Axis-aligned box used for static occluders and body shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    /// Creates a box from its center and half extents.
    pub fn from_center(center: Vector3<f32>, half_extents: Vector3<f32>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Returns the box center.
    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    /// Returns the half extents.
    pub fn half_extents(&self) -> Vector3<f32> {
        (self.max - self.min) * 0.5
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains(&self, point: &Vector3<f32>) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Returns true if the two boxes overlap with positive volume.
    pub fn intersects(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] < other.max[i] && self.max[i] > other.min[i])
    }

    /// Slab test. Returns the entry distance along a unit `direction`, if the
    /// ray enters the box in front of `origin` within `max_distance`.
    ///
    /// A ray starting inside the box does not report a hit.
    pub fn ray_entry(
        &self,
        origin: &Vector3<f32>,
        direction: &Vector3<f32>,
        max_distance: f32,
    ) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = max_distance;

        for i in 0..3 {
            if direction[i].abs() < 1e-8 {
                if origin[i] < self.min[i] || origin[i] > self.max[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / direction[i];
            let mut t0 = (self.min[i] - origin[i]) * inv;
            let mut t1 = (self.max[i] - origin[i]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        if self.contains(origin) {
            return None;
        }
        Some(t_min)
    }
}

/// Collision/query layers, combinable with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    /// Walls and injected layout geometry
    pub const STATIC: LayerMask = LayerMask(1);
    /// Boxes and ramps
    pub const OBJECTS: LayerMask = LayerMask(1 << 1);
    pub const AGENTS: LayerMask = LayerMask(1 << 2);
    /// Everything that blocks line of sight
    pub const OCCLUDERS: LayerMask = LayerMask(1 | (1 << 1));
    pub const ALL: LayerMask = LayerMask(u32::MAX);

    /// Returns true if any bit of `other` is set in `self`.
    pub fn intersects(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for LayerMask {
    type Output = LayerMask;

    fn bitor(self, rhs: LayerMask) -> LayerMask {
        LayerMask(self.0 | rhs.0)
    }
}

/// Result of an occlusion ray query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin to the hit point
    pub distance: f32,

    /// Dynamic body that was hit, `None` for static geometry
    pub body: Option<BodyId>,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpisodeOutcome {
    /// Step budget exhausted with hiders still at large
    HidersWin,
    /// Capture quota reached
    SeekersWin,
}

impl EpisodeOutcome {
    /// Returns the winning team.
    pub fn winner(self) -> Team {
        match self {
            EpisodeOutcome::HidersWin => Team::Hider,
            EpisodeOutcome::SeekersWin => Team::Seeker,
        }
    }
}

impl std::fmt::Display for EpisodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeOutcome::HidersWin => write!(f, "hiders_win"),
            EpisodeOutcome::SeekersWin => write!(f, "seekers_win"),
        }
    }
}
