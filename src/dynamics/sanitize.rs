// ==============================================================================
// sanitize.rs — NUMERIC DEGENERACY GUARD
// ------------------------------------------------------------------------------
// Every computed scalar/vector passes through here before it is stored on the
// vehicle or handed to the host. A non-finite value is replaced by a documented
// default at the point of detection and never propagates into the next stage.
//
// - finite_or(x, d):   x if finite, else d
// - sanitize_vec(v):   v if all components finite, else zero
// - safe_normalize(v): unit v, or None for zero/non-finite input
// ==============================================================================

use nalgebra::Vector3;

/// Magnitudes below this are treated as zero length.
pub const EPSILON: f32 = 1e-4;

#[inline]
pub fn finite_or(x: f32, default: f32) -> f32 {
    if x.is_finite() { x } else { default }
}

#[inline]
pub fn is_finite_vec(v: &Vector3<f32>) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Replaces any vector with a non-finite component by zero.
#[inline]
pub fn sanitize_vec(v: Vector3<f32>) -> Vector3<f32> {
    if is_finite_vec(&v) { v } else { Vector3::zeros() }
}

#[inline]
pub fn safe_normalize(v: Vector3<f32>) -> Option<Vector3<f32>> {
    let n = v.norm();
    if n.is_finite() && n > EPSILON { Some(v / n) } else { None }
}

/// `x.signum()` that maps zero (and NaN) to zero.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_components_collapse_to_zero() {
        let v = Vector3::new(1.0, f32::NAN, 2.0);
        assert_eq!(sanitize_vec(v), Vector3::zeros());
        assert_eq!(sanitize_vec(Vector3::new(1.0, 2.0, 3.0)), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn finite_or_falls_back() {
        assert_eq!(finite_or(f32::INFINITY, 4.0), 4.0);
        assert_eq!(finite_or(-2.5, 4.0), -2.5);
    }

    #[test]
    fn zero_vector_has_no_direction() {
        assert!(safe_normalize(Vector3::zeros()).is_none());
        assert!(safe_normalize(Vector3::new(f32::NAN, 0.0, 1.0)).is_none());
        let n = safe_normalize(Vector3::new(0.0, 0.0, 3.0)).unwrap();
        assert!((n.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(f32::NAN), 0.0);
        assert_eq!(sign(-3.0), -1.0);
    }
}
