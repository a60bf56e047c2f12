//! Vector utilities for segment projection and planar distances

use glam::{Vec2, Vec3};

/// Drops the vertical component of a position or velocity
#[inline]
pub fn to_2d(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.y)
}

/// Lifts a planar vector back to 3D at the given height
#[inline]
pub fn to_3d(v: Vec2, z: f32) -> Vec3 {
    Vec3::new(v.x, v.y, z)
}

/// Squared distance between two points on the XY plane
#[inline]
pub fn distance_2d_squared(a: Vec3, b: Vec3) -> f32 {
    to_2d(b - a).length_squared()
}

/// Parameter `t` in `[0, 1]` of the point on segment `[a, b]` closest to `p`
pub fn segment_param(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let ab_len_sq = ab.length_squared();

    // Degenerate segment collapses to its start point
    if ab_len_sq < f32::EPSILON {
        return 0.0;
    }

    ((p - a).dot(ab) / ab_len_sq).clamp(0.0, 1.0)
}

/// Finds the closest point on a line segment to a given point
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    a + (b - a) * segment_param(p, a, b)
}

/// Calculates the squared distance between a point and a line segment
pub fn distance_point_segment_squared(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    (p - closest_point_on_segment(p, a, b)).length_squared()
}

/// Planar variant of [`closest_point_on_segment`]
pub fn closest_point_on_segment_2d(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let ab = b - a;
    let ab_len_sq = ab.length_squared();
    if ab_len_sq < f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / ab_len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Squared distance between a point and a segment on the XY plane
pub fn distance_point_segment_2d_squared(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    (p - closest_point_on_segment_2d(p, a, b)).length_squared()
}

/// Squared distance between two planar segments `[a0, a1]` and `[b0, b1]`
pub fn distance_segment_segment_2d_squared(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> f32 {
    if segments_intersect_2d(a0, a1, b0, b1) {
        return 0.0;
    }
    distance_point_segment_2d_squared(a0, b0, b1)
        .min(distance_point_segment_2d_squared(a1, b0, b1))
        .min(distance_point_segment_2d_squared(b0, a0, a1))
        .min(distance_point_segment_2d_squared(b1, a0, a1))
}

/// Returns true if the planar segments `[a0, a1]` and `[b0, b1]` cross
pub fn segments_intersect_2d(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> bool {
    let d1 = crate::left_of(b0, b1, a0);
    let d2 = crate::left_of(b0, b1, a1);
    let d3 = crate::left_of(a0, a1, b0);
    let d4 = crate::left_of(a0, a1, b1);

    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Normalizes the planar part of `v`, returning zero for near-zero input
#[inline]
pub fn normalize_2d_or_zero(v: Vec3) -> Vec3 {
    let planar = to_2d(v).normalize_or_zero();
    Vec3::new(planar.x, planar.y, 0.0)
}
