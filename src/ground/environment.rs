//! Environment classification (Outside / Tunnel / CityLike).
//!
//! The core only reports the category; ambience blending belongs to the
//! presentation layer.

use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};

use crate::ground::{probe_solid, IgnoreSet, WorldQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Outside,
    Tunnel,
    CityLike,
}

/// Solid cover overhead means a tunnel; solid geometry close on both sides
/// means a street canyon.
pub fn sense_environment<W: WorldQuery + ?Sized>(
    world: &W,
    pose: &Isometry3<f32>,
    ignore: &IgnoreSet,
    roof_height: f32,
    side_distance: f32,
) -> Environment {
    let origin = pose.translation.vector.into();

    let up = probe_solid(world, origin, Vector3::y() * roof_height, ignore);
    if up.is_hit() {
        return Environment::Tunnel;
    }

    let right = pose.rotation * Vector3::x();
    let left_hit = probe_solid(world, origin, -right * side_distance, ignore).is_hit();
    let right_hit = probe_solid(world, origin, right * side_distance, ignore).is_hit();

    if left_hit && right_hit {
        Environment::CityLike
    } else {
        Environment::Outside
    }
}
