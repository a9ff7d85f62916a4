//! ground - world sensing for the vehicle core (engine-agnostic).
//!
//! The core never touches a physics engine directly. Everything it knows about
//! the world arrives through [`WorldQuery::cast_ray`]; `probe` builds the
//! solid / material-filtered probes on top of it and `environment` classifies
//! the surroundings. `scene` is a small in-memory world used by headless runs
//! and tests.

pub mod environment;
pub mod probe;
pub mod scene;

use nalgebra::{Isometry3, Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};

pub use environment::{sense_environment, Environment};
pub use probe::{probe_solid, probe_solid_bounded, probe_solid_with_material, probe_touching_material};
pub use scene::{BoxScene, SceneBox};

/// Stable identity of a queryable surface (one collider / one scene box).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// Material tag carried by every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    #[default]
    Concrete,
    Road,
    Dirt,
    Grass,
    Sand,
    Metal,
    Foliage,
    Water,
    Spikes,
}

/// One raw intersection reported by the world.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHit {
    pub surface: SurfaceId,
    /// Distance along the (unit) ray direction.
    pub distance: f32,
    pub position: Point3<f32>,
    pub normal: Vector3<f32>,
    pub material: Material,
    /// Collidable? Non-solid surfaces (foliage, triggers, water volumes) are
    /// skipped by the solid probes.
    pub solid: bool,
    /// World pose of the surface, used for road-local coordinates.
    pub frame: Isometry3<f32>,
}

/// Slots reserved for the caller's own surfaces (chassis and attachments).
pub const CALLER_IGNORE_SLOTS: usize = 3;
/// Maximum number of surfaces a probe can exclude: the caller's slots plus
/// one per cast of the looping probe, so the probe's own arena never exceeds
/// [`probe::PROBE_ATTEMPTS`] entries and never runs out before its budget.
pub const IGNORE_CAPACITY: usize = CALLER_IGNORE_SLOTS + probe::PROBE_ATTEMPTS;

/// Fixed-capacity exclusion list.
///
/// Callers seed it with their own surfaces (the chassis); probes copy it and
/// append the non-solid surfaces they pass through.
#[derive(Debug, Clone, Copy)]
pub struct IgnoreSet {
    entries: [SurfaceId; IGNORE_CAPACITY],
    len: usize,
}

impl PartialEq for IgnoreSet {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self {
            entries: [SurfaceId(0); IGNORE_CAPACITY],
            len: 0,
        }
    }
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(ids: &[SurfaceId]) -> Self {
        let mut set = Self::default();
        for &id in ids {
            set.push(id);
        }
        set
    }

    /// Returns `false` when the set is full and `id` was not recorded.
    pub fn push(&mut self, id: SurfaceId) -> bool {
        if self.contains(id) {
            return true;
        }
        if self.len == IGNORE_CAPACITY {
            return false;
        }
        self.entries[self.len] = id;
        self.len += 1;
        true
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.entries[..self.len].contains(&id)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[SurfaceId] {
        &self.entries[..self.len]
    }
}

/// The world's single sensing primitive.
///
/// Implementations must return the nearest intersection along `dir` within
/// `max_dist` whose surface is not in `ignore`, solid or not. The world is
/// read-only during simulation, so implementations are shared across
/// vehicles (`Sync`).
pub trait WorldQuery: Sync {
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Unit<Vector3<f32>>,
        max_dist: f32,
        ignore: &IgnoreSet,
    ) -> Option<SurfaceHit>;
}

/// Result of a probe. A miss is a valid, synthetic result: `hit` is `None`,
/// `position` is the end of the requested ray and `normal` points down.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GroundQueryResult {
    pub hit: Option<SurfaceId>,
    pub position: Point3<f32>,
    pub normal: Vector3<f32>,
    pub material: Option<Material>,
    pub solid: bool,
    /// Distance travelled from the probe origin.
    pub distance: f32,
    #[serde(skip)]
    pub frame: Option<Isometry3<f32>>,
}

impl GroundQueryResult {
    pub fn miss(end: Point3<f32>, length: f32) -> Self {
        Self {
            hit: None,
            position: end,
            normal: -Vector3::y(),
            material: None,
            solid: false,
            distance: length,
            frame: None,
        }
    }

    pub fn from_hit(hit: &SurfaceHit, distance: f32) -> Self {
        Self {
            hit: Some(hit.surface),
            position: hit.position,
            normal: hit.normal,
            material: Some(hit.material),
            solid: hit.solid,
            distance,
            frame: Some(hit.frame),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.hit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_set_is_bounded_and_deduplicates() {
        let mut set = IgnoreSet::new();
        for i in 0..IGNORE_CAPACITY as u64 {
            assert!(set.push(SurfaceId(i)));
        }
        assert!(set.push(SurfaceId(0)));
        assert!(!set.push(SurfaceId(99)));
        assert_eq!(set.len(), IGNORE_CAPACITY);
        assert!(!set.contains(SurfaceId(99)));
    }

    #[test]
    fn miss_points_down() {
        let miss = GroundQueryResult::miss(Point3::new(0.0, -3.0, 0.0), 3.0);
        assert!(!miss.is_hit());
        assert_eq!(miss.normal, Vector3::new(0.0, -1.0, 0.0));
        assert!(miss.material.is_none());
    }
}
