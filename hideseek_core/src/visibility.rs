//! Line-of-sight computation.
//!
//! A target is visible when it passes three gates in order:
//! 1. **Distance**: within `view_distance` of the observer
//! 2. **Angle**: within half the field of view, measured on the XZ plane
//! 3. **Occlusion**: at least one ray from the observer's eye reaches one of
//!    three samples on the target (center, near-top, near-bottom)
//!
//! Results are cached per ordered (observer, target) pair for a few steps.
//! The cache never changes an answer in a static world; it only saves rays.

use crate::config::VisibilityConfig;
use crate::entity::Agent;
use hideseek_env::{AgentId, LayerMask, PhysicsBackend};
use nalgebra::Vector3;
use std::collections::HashMap;

/// Purge cadence in steps.
pub const PURGE_INTERVAL: u64 = 30;

/// Entries older than this many cache windows are dropped by `purge`.
const PURGE_AGE_FACTOR: u64 = 10;

/// Below this length a horizontal projection has no usable direction.
const DEGENERATE_EPS: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    visible: bool,
    computed_at: u64,
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Visibility engine with a time-windowed pair cache.
pub struct VisibilityEngine {
    config: VisibilityConfig,

    /// Cosine of half the field of view
    cos_half_fov: f32,

    cache: HashMap<(AgentId, AgentId), CacheEntry>,

    stats: CacheStats,
}

impl VisibilityEngine {
    pub fn new(config: VisibilityConfig) -> Self {
        let cos_half_fov = half_angle_cos(config.view_angle_deg);
        Self {
            config,
            cos_half_fov,
            cache: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Enables or disables caching. Disabling also empties the cache.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.config.cache_enabled = enabled;
        if !enabled {
            self.cache.clear();
        }
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached entry.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Drops entries older than ten cache windows.
    pub fn purge(&mut self, step: u64) {
        let max_age = self.config.cache_frames.saturating_mul(PURGE_AGE_FACTOR);
        self.cache
            .retain(|_, entry| step.saturating_sub(entry.computed_at) <= max_age);
    }

    /// Returns whether `observer` can see `target` with the configured field
    /// of view and range, consulting the cache.
    pub fn can_see<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &P,
        observer: &Agent,
        target: &Agent,
        step: u64,
    ) -> bool {
        if !observer.active || !target.active || observer.id == target.id {
            return false;
        }

        let key = (observer.id, target.id);
        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(&key) {
                if step >= entry.computed_at
                    && step - entry.computed_at <= self.config.cache_frames
                {
                    self.stats.hits += 1;
                    return entry.visible;
                }
            }
        }

        self.stats.misses += 1;
        let visible = self.compute(
            physics,
            observer,
            target,
            self.cos_half_fov,
            self.config.view_distance,
        );
        if self.config.cache_enabled {
            self.cache.insert(
                key,
                CacheEntry {
                    visible,
                    computed_at: step,
                },
            );
        }
        visible
    }

    /// Uncached query with an explicit field of view (degrees) and range.
    pub fn can_see_with<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &P,
        observer: &Agent,
        target: &Agent,
        view_angle_deg: f32,
        view_distance: f32,
    ) -> bool {
        if !observer.active || !target.active || observer.id == target.id {
            return false;
        }
        self.compute(
            physics,
            observer,
            target,
            half_angle_cos(view_angle_deg),
            view_distance,
        )
    }

    fn compute<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &P,
        observer: &Agent,
        target: &Agent,
        cos_half_fov: f32,
        view_distance: f32,
    ) -> bool {
        let from = observer.position();
        let to = target.position();
        let delta = to - from;
        let distance = delta.norm();

        if !distance.is_finite() || !view_distance.is_finite() || distance > view_distance {
            return false;
        }

        if !within_cone(&observer.pose.forward, &delta, cos_half_fov) {
            return false;
        }

        let eye = self.eye(observer);
        let offset = self.config.sample_offset;
        [0.0, offset, -offset]
            .iter()
            .any(|dy| self.ray_reaches(physics, &eye, &(to + Vector3::y() * *dy)))
    }

    /// Share of the target's sample points hidden from the observer, in [0, 1].
    ///
    /// Six samples (three heights by two lateral offsets) are tested for
    /// occlusion only. Targets out of range or inactive count as fully
    /// occluded.
    pub fn visibility_fraction<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &P,
        observer: &Agent,
        target: &Agent,
        view_distance: f32,
    ) -> f32 {
        if !observer.active || !target.active || observer.id == target.id {
            return 1.0;
        }

        let to = target.position();
        let delta = to - observer.position();
        let distance = delta.norm();
        if !distance.is_finite() || distance > view_distance {
            return 1.0;
        }

        // Lateral axis perpendicular to the sight line on the XZ plane
        let flat = Vector3::new(delta.x, 0.0, delta.z);
        let lateral = if flat.norm() > DEGENERATE_EPS {
            Vector3::new(flat.z, 0.0, -flat.x).normalize()
        } else {
            Vector3::x()
        };

        let eye = self.eye(observer);
        let offset = self.config.sample_offset;
        let side = self.config.lateral_offset;

        let mut occluded = 0;
        let mut total = 0;
        for dy in [-offset, 0.0, offset] {
            for dx in [-side, side] {
                let sample = to + Vector3::y() * dy + lateral * dx;
                total += 1;
                if !self.ray_reaches(physics, &eye, &sample) {
                    occluded += 1;
                }
            }
        }

        occluded as f32 / total as f32
    }

    /// Computes every opponent sighting among `agents` for this step.
    pub fn sightings<P: PhysicsBackend + ?Sized>(
        &mut self,
        physics: &P,
        agents: &[Agent],
        step: u64,
    ) -> Sightings {
        let n = agents.len();
        let mut table = Sightings::empty(n);
        for observer in agents {
            for target in agents {
                if observer.team == target.team {
                    continue;
                }
                if self.can_see(physics, observer, target, step) {
                    table.set(observer.id, target.id);
                }
            }
        }
        table
    }

    fn eye(&self, observer: &Agent) -> Vector3<f32> {
        observer.position() + Vector3::y() * self.config.eye_height
    }

    /// True if nothing on the occluder layers blocks `from -> to`.
    fn ray_reaches<P: PhysicsBackend + ?Sized>(
        &self,
        physics: &P,
        from: &Vector3<f32>,
        to: &Vector3<f32>,
    ) -> bool {
        let delta = to - from;
        let length = delta.norm();
        if length < DEGENERATE_EPS {
            return true;
        }
        let direction = delta / length;
        match physics.raycast(from, &direction, length, LayerMask::OCCLUDERS) {
            None => true,
            Some(hit) => hit.distance >= length - self.config.hit_epsilon,
        }
    }
}

fn half_angle_cos(view_angle_deg: f32) -> f32 {
    let half = (view_angle_deg.clamp(0.0, 360.0) * 0.5).to_radians();
    half.cos()
}

/// Horizontal field-of-view test. Degenerate projections pass.
fn within_cone(forward: &Vector3<f32>, delta: &Vector3<f32>, cos_half_fov: f32) -> bool {
    let f = Vector3::new(forward.x, 0.0, forward.z);
    let d = Vector3::new(delta.x, 0.0, delta.z);
    let (fn_, dn) = (f.norm(), d.norm());
    if fn_ < DEGENERATE_EPS || dn < DEGENERATE_EPS {
        return true;
    }
    f.dot(&d) / (fn_ * dn) >= cos_half_fov - 1e-6
}

/// Who sees whom, for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sightings {
    n: usize,

    /// Row-major `observer * n + target`
    seen: Vec<bool>,
}

impl Sightings {
    pub fn empty(n: usize) -> Self {
        Self {
            n,
            seen: vec![false; n * n],
        }
    }

    fn set(&mut self, observer: AgentId, target: AgentId) {
        let (o, t) = (observer.index(), target.index());
        if o < self.n && t < self.n {
            self.seen[o * self.n + t] = true;
        }
    }

    pub fn sees(&self, observer: AgentId, target: AgentId) -> bool {
        let (o, t) = (observer.index(), target.index());
        o < self.n && t < self.n && self.seen[o * self.n + t]
    }

    /// Number of agents `observer` sees.
    pub fn visible_count(&self, observer: AgentId) -> usize {
        let o = observer.index();
        if o >= self.n {
            return 0;
        }
        self.seen[o * self.n..(o + 1) * self.n]
            .iter()
            .filter(|v| **v)
            .count()
    }

    /// True if any agent sees `target`.
    pub fn is_seen(&self, target: AgentId) -> bool {
        let t = target.index();
        t < self.n && (0..self.n).any(|o| self.seen[o * self.n + t])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hideseek_env::{Aabb, KinematicWorld, Pose, Team};

    fn agent(id: u32, team: Team, position: Vector3<f32>, yaw: f32) -> Agent {
        let mut a = Agent::new(AgentId(id), team, 0);
        a.pose = Pose::with_yaw(position, yaw);
        a
    }

    fn engine() -> VisibilityEngine {
        VisibilityEngine::new(VisibilityConfig::default())
    }

    #[test]
    fn test_visible_in_open_field() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 10.0), 0.0);

        assert!(vis.can_see(&world, &seeker, &hider, 0));
    }

    #[test]
    fn test_distance_gate() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 25.0), 0.0);

        assert!(!vis.can_see(&world, &seeker, &hider, 0));
        assert!(vis.can_see_with(&world, &seeker, &hider, 90.0, 30.0));
    }

    #[test]
    fn test_angle_gate_not_symmetric() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        // Both face +Z; the hider is behind the seeker
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 5.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 0.0), 0.0);

        assert!(!vis.can_see(&world, &seeker, &hider, 0));
        assert!(vis.can_see(&world, &hider, &seeker, 0));
    }

    #[test]
    fn test_wall_occludes() {
        let mut world = KinematicWorld::new();
        world.add_static_occluder(Aabb::from_center(
            Vector3::new(0.0, 2.0, 5.0),
            Vector3::new(3.0, 2.0, 0.2),
        ));
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 10.0), 0.0);

        assert!(!vis.can_see(&world, &seeker, &hider, 0));
        assert_eq!(vis.visibility_fraction(&world, &seeker, &hider, 20.0), 1.0);
    }

    #[test]
    fn test_low_wall_leaves_top_sample_visible() {
        let mut world = KinematicWorld::new();
        // Top of the wall at y = 0.6, below the eye (0.9) and the top sample (0.9)
        world.add_static_occluder(Aabb::from_center(
            Vector3::new(0.0, 0.3, 5.0),
            Vector3::new(3.0, 0.3, 0.2),
        ));
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 10.0), 0.0);

        assert!(vis.can_see(&world, &seeker, &hider, 0));
        let fraction = vis.visibility_fraction(&world, &seeker, &hider, 20.0);
        assert!(fraction > 0.0 && fraction < 1.0);
    }

    #[test]
    fn test_inactive_endpoint_not_visible() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let mut hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 5.0), 0.0);
        hider.active = false;

        assert!(!vis.can_see(&world, &seeker, &hider, 0));
    }

    #[test]
    fn test_cache_window_and_purge() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        let seeker = agent(0, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0);
        let hider = agent(1, Team::Hider, Vector3::new(0.0, 0.5, 5.0), 0.0);

        vis.can_see(&world, &seeker, &hider, 0);
        vis.can_see(&world, &seeker, &hider, 3);
        assert_eq!(vis.stats(), CacheStats { hits: 1, misses: 1 });

        vis.can_see(&world, &seeker, &hider, 4);
        assert_eq!(vis.stats().misses, 2);

        vis.purge(4 + 30);
        assert_eq!(vis.cache_len(), 1);
        vis.purge(4 + 31);
        assert_eq!(vis.cache_len(), 0);
    }

    #[test]
    fn test_cache_does_not_change_answers() {
        let mut world = KinematicWorld::new();
        world.add_static_occluder(Aabb::from_center(
            Vector3::new(2.0, 2.0, 4.0),
            Vector3::new(1.0, 2.0, 0.2),
        ));
        let agents: Vec<Agent> = (0..6)
            .map(|i| {
                let team = if i % 2 == 0 { Team::Hider } else { Team::Seeker };
                let x = (i as f32 - 2.5) * 1.7;
                let z = (i as f32 * 1.3) % 7.0;
                agent(i, team, Vector3::new(x, 0.5, z), i as f32 * 0.9)
            })
            .collect();

        let mut cached = engine();
        let mut uncached = engine();
        uncached.set_cache_enabled(false);

        for step in 0..10 {
            let a = cached.sightings(&world, &agents, step);
            let b = uncached.sightings(&world, &agents, step);
            assert_eq!(a, b);
        }
        assert!(cached.stats().hits > 0);
        assert_eq!(uncached.stats().hits, 0);
    }

    #[test]
    fn test_sightings_counts() {
        let world = KinematicWorld::new();
        let mut vis = engine();
        let agents = vec![
            agent(0, Team::Hider, Vector3::new(-1.0, 0.5, 6.0), 0.0),
            agent(1, Team::Hider, Vector3::new(1.0, 0.5, 6.0), 0.0),
            agent(2, Team::Seeker, Vector3::new(0.0, 0.5, 0.0), 0.0),
        ];

        let table = vis.sightings(&world, &agents, 0);
        assert_eq!(table.visible_count(AgentId(2)), 2);
        assert!(table.is_seen(AgentId(0)));
        // Hiders face away from the seeker
        assert!(!table.is_seen(AgentId(2)));
        // Teammates are not tracked
        assert!(!table.sees(AgentId(0), AgentId(1)));
    }
}
