//! Scalar and 2D math helpers

use glam::Vec2;

/// Epsilon used to detect near-parallel lines in the velocity solver
pub const RVO_EPSILON: f32 = 1e-5;

/// Determinant of the 2x2 matrix `[a b]` (the 2D cross product)
#[inline]
pub fn det_2d(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Signed area telling on which side of line `a -> b` the point `c` lies.
/// Positive means left.
#[inline]
pub fn left_of(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    det_2d(a - c, b - a)
}

/// Squared value
#[inline]
pub fn sqr(v: f32) -> f32 {
    v * v
}

/// Converts degrees to radians
#[inline]
pub fn deg_to_rad(deg: f32) -> f32 {
    deg.to_radians()
}

/// Slope angle in degrees of a rise `dz` over a horizontal run
#[inline]
pub fn slope_degrees(dz: f32, horizontal: f32) -> f32 {
    (dz.abs() / horizontal).atan().to_degrees()
}

/// Orders two floats with `total_cmp`, for use as a heap key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF32(pub f32);

impl Eq for OrderedF32 {}

impl PartialOrd for OrderedF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
