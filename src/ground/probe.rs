// ==============================================================================
// probe.rs — SOLID / MATERIAL-FILTERED GROUND PROBES
// ------------------------------------------------------------------------------
// A probe walks a ray through the world, passing through surfaces it does not
// accept (non-solid geometry, wrong material). Each rejected surface is added
// to a local ignore set and the remaining length is re-cast from its hit point.
//
// Termination:
// - accepted hit                       -> that hit
// - nothing further along the ray      -> synthetic miss
// - remaining length <= PROBE_EPSILON  -> synthetic miss
// - attempt budget spent / ignore full -> synthetic miss
//
// Running out of budget is the designed degenerate case (vehicle over a hole),
// never an error. The synthetic miss sits at the end of the original ray with a
// world-down normal.
// ==============================================================================

use std::ops::ControlFlow;

use nalgebra::{Point3, Unit, Vector3};

use crate::ground::{GroundQueryResult, IgnoreSet, Material, SurfaceHit, WorldQuery};

/// Attempt budget of the looping probes.
pub const PROBE_ATTEMPTS: usize = 5;
/// Attempt budget of the unrolled probe.
pub const BOUNDED_PROBE_ATTEMPTS: usize = 3;
/// Remaining ray length below which probing stops.
pub const PROBE_EPSILON: f32 = 1e-3;

/// Walk state shared by every probe variant.
struct ProbeCursor {
    origin: Point3<f32>,
    dir: Unit<Vector3<f32>>,
    total: f32,
    from: Point3<f32>,
    remaining: f32,
    ignore: IgnoreSet,
}

impl ProbeCursor {
    fn new(origin: Point3<f32>, displacement: Vector3<f32>, ignore: &IgnoreSet) -> Option<Self> {
        let total = displacement.norm();
        if !total.is_finite() || total <= PROBE_EPSILON || !origin.coords.iter().all(|c| c.is_finite()) {
            return None;
        }
        Some(Self {
            origin,
            dir: Unit::new_unchecked(displacement / total),
            total,
            from: origin,
            remaining: total,
            ignore: *ignore,
        })
    }

    fn miss(&self) -> GroundQueryResult {
        GroundQueryResult::miss(self.origin + self.dir.into_inner() * self.total, self.total)
    }

    /// One cast. `Break` carries the terminal result, `Continue` means the hit
    /// was rejected and the cursor moved past it.
    fn advance<W, F>(&mut self, world: &W, accept: &F) -> ControlFlow<GroundQueryResult>
    where
        W: WorldQuery + ?Sized,
        F: Fn(&SurfaceHit) -> bool,
    {
        if self.remaining <= PROBE_EPSILON {
            return ControlFlow::Break(self.miss());
        }

        let Some(hit) = world.cast_ray(self.from, self.dir, self.remaining, &self.ignore) else {
            return ControlFlow::Break(self.miss());
        };

        let step = hit.distance.clamp(0.0, self.remaining);
        let travelled = self.total - self.remaining + step;

        if accept(&hit) {
            return ControlFlow::Break(GroundQueryResult::from_hit(&hit, travelled));
        }

        if !self.ignore.push(hit.surface) {
            return ControlFlow::Break(self.miss());
        }
        self.from = hit.position;
        self.remaining -= step;
        ControlFlow::Continue(())
    }
}

fn probe_looping<W, F>(
    world: &W,
    origin: Point3<f32>,
    displacement: Vector3<f32>,
    ignore: &IgnoreSet,
    accept: F,
) -> GroundQueryResult
where
    W: WorldQuery + ?Sized,
    F: Fn(&SurfaceHit) -> bool,
{
    let Some(mut cursor) = ProbeCursor::new(origin, displacement, ignore) else {
        return degenerate_miss(origin, displacement);
    };

    for _ in 0..PROBE_ATTEMPTS {
        if let ControlFlow::Break(result) = cursor.advance(world, &accept) {
            return result;
        }
    }
    cursor.miss()
}

fn degenerate_miss(origin: Point3<f32>, displacement: Vector3<f32>) -> GroundQueryResult {
    let end = origin + displacement;
    if end.coords.iter().all(|c| c.is_finite()) {
        GroundQueryResult::miss(end, displacement.norm())
    } else {
        GroundQueryResult::miss(origin, 0.0)
    }
}

#[inline]
fn is_solid(hit: &SurfaceHit) -> bool {
    hit.solid
}

/// First solid surface along `origin + displacement`, skipping non-solid
/// geometry, within [`PROBE_ATTEMPTS`] casts.
pub fn probe_solid<W: WorldQuery + ?Sized>(
    world: &W,
    origin: Point3<f32>,
    displacement: Vector3<f32>,
    ignore: &IgnoreSet,
) -> GroundQueryResult {
    probe_looping(world, origin, displacement, ignore, is_solid)
}

/// Same contract as [`probe_solid`], unrolled to [`BOUNDED_PROBE_ATTEMPTS`]
/// casts for the per-wheel hot path. Results match [`probe_solid`] whenever
/// at most two non-solid surfaces lie above the ground; a third one exhausts
/// this budget and yields the synthetic miss where the looping probe would
/// still reach the ground.
pub fn probe_solid_bounded<W: WorldQuery + ?Sized>(
    world: &W,
    origin: Point3<f32>,
    displacement: Vector3<f32>,
    ignore: &IgnoreSet,
) -> GroundQueryResult {
    let Some(mut cursor) = ProbeCursor::new(origin, displacement, ignore) else {
        return degenerate_miss(origin, displacement);
    };

    if let ControlFlow::Break(result) = cursor.advance(world, &is_solid) {
        return result;
    }
    if let ControlFlow::Break(result) = cursor.advance(world, &is_solid) {
        return result;
    }
    if let ControlFlow::Break(result) = cursor.advance(world, &is_solid) {
        return result;
    }
    cursor.miss()
}

/// As [`probe_solid`], but a hit only terminates the probe when it is solid
/// *and* tagged `required`.
pub fn probe_solid_with_material<W: WorldQuery + ?Sized>(
    world: &W,
    origin: Point3<f32>,
    displacement: Vector3<f32>,
    ignore: &IgnoreSet,
    required: Material,
) -> GroundQueryResult {
    probe_looping(world, origin, displacement, ignore, |hit: &SurfaceHit| {
        hit.solid && hit.material == required
    })
}

/// First surface tagged `material`, solid or not (water volumes).
pub fn probe_touching_material<W: WorldQuery + ?Sized>(
    world: &W,
    origin: Point3<f32>,
    displacement: Vector3<f32>,
    ignore: &IgnoreSet,
    material: Material,
) -> GroundQueryResult {
    probe_looping(world, origin, displacement, ignore, |hit: &SurfaceHit| hit.material == material)
}
