//! Spawn-position sampling.

use nalgebra::Vector3;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

/// Rejection sampler for planar spawn positions.
///
/// Positions are drawn uniformly inside the square `[-extent, extent]²` on
/// the XZ plane and rejected if they fall within `min_separation` of an
/// already placed point. When every attempt is rejected the last sample is
/// used anyway.
#[derive(Debug, Clone)]
pub struct SpawnSampler {
    /// Half side of the sampling square (arena half extent minus margin)
    extent: f32,

    min_separation: f32,

    max_attempts: u32,

    /// Points placed since the last `clear`
    placed: Vec<Vector3<f32>>,

    /// Number of samples that fell back to the last attempt
    exhausted: u32,
}

impl SpawnSampler {
    pub fn new(extent: f32, min_separation: f32, max_attempts: u32) -> Self {
        Self {
            extent: extent.max(0.0),
            min_separation: min_separation.max(0.0),
            max_attempts: max_attempts.max(1),
            placed: Vec::new(),
            exhausted: 0,
        }
    }

    /// Forgets all placed points.
    pub fn clear(&mut self) {
        self.placed.clear();
        self.exhausted = 0;
    }

    /// Registers a fixed point other samples must keep clear of.
    pub fn reserve(&mut self, point: Vector3<f32>) {
        self.placed.push(point);
    }

    pub fn placed(&self) -> &[Vector3<f32>] {
        &self.placed
    }

    /// Number of `sample` calls since `clear` that ran out of attempts.
    pub fn exhausted(&self) -> u32 {
        self.exhausted
    }

    /// Draws a position (y = 0) and records it as placed.
    pub fn sample(&mut self, rng: &mut ChaCha8Rng) -> Vector3<f32> {
        let mut candidate = Vector3::zeros();

        for _ in 0..self.max_attempts {
            candidate = self.draw(rng);
            if self.is_clear(&candidate) {
                self.placed.push(candidate);
                return candidate;
            }
        }

        warn!(
            "Spawn sampling exhausted {} attempts, using last sample ({:.2}, {:.2})",
            self.max_attempts, candidate.x, candidate.z
        );
        self.exhausted += 1;
        self.placed.push(candidate);
        candidate
    }

    /// Draws a position without recording it.
    pub fn sample_unrecorded(&mut self, rng: &mut ChaCha8Rng) -> Vector3<f32> {
        let mut candidate = Vector3::zeros();
        for _ in 0..self.max_attempts {
            candidate = self.draw(rng);
            if self.is_clear(&candidate) {
                return candidate;
            }
        }
        candidate
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> Vector3<f32> {
        if self.extent <= 0.0 {
            return Vector3::zeros();
        }
        Vector3::new(
            rng.gen_range(-self.extent..=self.extent),
            0.0,
            rng.gen_range(-self.extent..=self.extent),
        )
    }

    fn is_clear(&self, candidate: &Vector3<f32>) -> bool {
        self.placed.iter().all(|p| {
            let dx = p.x - candidate.x;
            let dz = p.z - candidate.z;
            (dx * dx + dz * dz).sqrt() >= self.min_separation
        })
    }
}

/// Draws a yaw angle in `[-π, π)`.
pub fn random_yaw(rng: &mut ChaCha8Rng) -> f32 {
    rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_samples_respect_separation() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut sampler = SpawnSampler::new(10.0, 2.0, 50);

        for _ in 0..8 {
            sampler.sample(&mut rng);
        }

        assert_eq!(sampler.exhausted(), 0);
        let placed = sampler.placed();
        for i in 0..placed.len() {
            assert!(placed[i].x.abs() <= 10.0 && placed[i].z.abs() <= 10.0);
            for j in (i + 1)..placed.len() {
                let d = (placed[i] - placed[j]).norm();
                assert!(d >= 2.0, "points {} and {} are {} apart", i, j, d);
            }
        }
    }

    #[test]
    fn test_exhaustion_falls_back_to_last_sample() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // A 1x1 square cannot fit two points 100 apart
        let mut sampler = SpawnSampler::new(0.5, 100.0, 5);

        sampler.sample(&mut rng);
        let second = sampler.sample(&mut rng);

        assert_eq!(sampler.exhausted(), 1);
        assert_eq!(sampler.placed().len(), 2);
        assert!(second.x.abs() <= 0.5);
    }

    #[test]
    fn test_same_seed_same_samples() {
        let mut a = SpawnSampler::new(10.0, 1.0, 30);
        let mut b = SpawnSampler::new(10.0, 1.0, 30);
        let mut rng_a = ChaCha8Rng::seed_from_u64(99);
        let mut rng_b = ChaCha8Rng::seed_from_u64(99);

        for _ in 0..5 {
            assert_eq!(a.sample(&mut rng_a), b.sample(&mut rng_b));
        }
    }

    #[test]
    fn test_zero_extent_samples_origin() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut sampler = SpawnSampler::new(0.0, 0.0, 3);
        assert_eq!(sampler.sample(&mut rng), Vector3::zeros());
    }
}
