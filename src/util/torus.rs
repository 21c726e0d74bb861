//! Helpers for the wrapping (toroidal) arena and radian angle arithmetic

use std::f32::consts::{PI, TAU};

use crate::util::vec2::Vec2;

/// Wrap a coordinate into `[0, size)`.
///
/// `rem_euclid` can round up to exactly `size` for tiny negative inputs,
/// which would land one past the last grid cell.
#[inline]
pub fn wrap_coord(value: f32, size: f32) -> f32 {
    let wrapped = value.rem_euclid(size);
    if wrapped >= size {
        0.0
    } else {
        wrapped
    }
}

/// Wrap both components of a position into the arena
#[inline]
pub fn wrap_position(position: Vec2, size: f32) -> Vec2 {
    Vec2::new(wrap_coord(position.x, size), wrap_coord(position.y, size))
}

/// Shortest displacement from `from` to `to` on the torus
pub fn shortest_delta(from: Vec2, to: Vec2, size: f32) -> Vec2 {
    let half = size * 0.5;
    let mut delta = to - from;
    if delta.x > half {
        delta.x -= size;
    } else if delta.x < -half {
        delta.x += size;
    }
    if delta.y > half {
        delta.y -= size;
    } else if delta.y < -half {
        delta.y += size;
    }
    delta
}

/// Normalize an angle in radians into `[0, 2π)`
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Absolute angular difference in `[0, π]`
pub fn angle_between(a: f32, b: f32) -> f32 {
    let diff = normalize_angle(a - b);
    if diff > PI {
        TAU - diff
    } else {
        diff
    }
}
