//! In-memory world made of axis-aligned boxes.
//!
//! Used by headless simulation and the test-suite. It counts casts so probe
//! attempt budgets can be observed from the outside.

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};

use crate::ground::{IgnoreSet, Material, SurfaceHit, SurfaceId, WorldQuery};

#[derive(Debug, Clone, Copy)]
pub struct SceneBox {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
    pub material: Material,
    pub solid: bool,
}

impl SceneBox {
    pub fn solid(min: Point3<f32>, max: Point3<f32>, material: Material) -> Self {
        Self { min, max, material, solid: true }
    }

    pub fn non_solid(min: Point3<f32>, max: Point3<f32>, material: Material) -> Self {
        Self { min, max, material, solid: false }
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Surface frame: the box centre, axis-aligned.
    fn frame(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.center().coords), UnitQuaternion::identity())
    }

    /// Slab test. Returns `(distance, normal)`; a ray starting inside the box
    /// hits at distance 0 with a normal opposing the ray.
    fn intersect(&self, origin: &Point3<f32>, dir: &Vector3<f32>, max_dist: f32) -> Option<(f32, Vector3<f32>)> {
        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;
        let mut near_axis = None;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let t1 = (lo - o) / d;
            let t2 = (hi - o) / d;
            let (a, b) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            if a > t_near {
                t_near = a;
                near_axis = Some(axis);
            }
            t_far = t_far.min(b);
        }

        if t_near > t_far || t_far < 0.0 {
            return None;
        }

        if t_near <= 0.0 {
            return Some((0.0, -dir));
        }
        if t_near > max_dist {
            return None;
        }

        let mut normal = Vector3::zeros();
        if let Some(axis) = near_axis {
            normal[axis] = -dir[axis].signum();
        }
        Some((t_near, normal))
    }
}

#[derive(Debug, Default)]
pub struct BoxScene {
    boxes: Vec<SceneBox>,
    casts: AtomicUsize,
}

impl BoxScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, b: SceneBox) -> SurfaceId {
        self.boxes.push(b);
        SurfaceId(self.boxes.len() as u64 - 1)
    }

    pub fn get(&self, id: SurfaceId) -> Option<&SceneBox> {
        self.boxes.get(id.0 as usize)
    }

    /// Number of `cast_ray` calls since creation.
    pub fn cast_count(&self) -> usize {
        self.casts.load(Ordering::Relaxed)
    }

    /// Flat ground slab with its top at `y = 0`.
    pub fn flat_ground(half_extent: f32, material: Material) -> Self {
        let mut scene = Self::new();
        scene.add(SceneBox::solid(
            Point3::new(-half_extent, -1.0, -half_extent),
            Point3::new(half_extent, 0.0, half_extent),
            material,
        ));
        scene
    }
}

impl WorldQuery for BoxScene {
    fn cast_ray(
        &self,
        origin: Point3<f32>,
        dir: Unit<Vector3<f32>>,
        max_dist: f32,
        ignore: &IgnoreSet,
    ) -> Option<SurfaceHit> {
        self.casts.fetch_add(1, Ordering::Relaxed);

        let mut best: Option<(usize, f32, Vector3<f32>)> = None;
        for (i, b) in self.boxes.iter().enumerate() {
            let id = SurfaceId(i as u64);
            if ignore.contains(id) {
                continue;
            }
            let Some((t, n)) = b.intersect(&origin, &dir, max_dist) else { continue };
            if best.map_or(true, |(_, bt, _)| t < bt) {
                best = Some((i, t, n));
            }
        }

        best.map(|(i, t, normal)| {
            let b = &self.boxes[i];
            SurfaceHit {
                surface: SurfaceId(i as u64),
                distance: t,
                position: origin + dir.into_inner() * t,
                normal,
                material: b.material,
                solid: b.solid,
                frame: b.frame(),
            }
        })
    }
}
