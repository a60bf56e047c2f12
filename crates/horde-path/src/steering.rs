//! Following a waypoint path with look-ahead

use glam::Vec3;
use horde_common::{closest_point_on_segment, distance_2d_squared, normalize_2d_or_zero, sqr};

/// Outcome of [`steer_along_path`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Steering {
    /// False when the agent strayed from the path or the path no longer
    /// ends at the goal; the caller should plan a new path
    pub valid: bool,
    /// Planar unit direction towards the look-ahead target
    pub direction: Vec3,
}

/// Steers along `path` towards a point `max(look_ahead, speed * 0.5)`
/// further down the path than the closest point to `position`.
///
/// The direction is produced even when the path is reported invalid.
pub fn steer_along_path(
    position: Vec3,
    goal: Vec3,
    path: &[Vec3],
    speed: f32,
    look_ahead: f32,
    path_radius: f32,
    accept_radius: f32,
) -> Steering {
    if path.len() < 2 {
        return Steering::default();
    }

    let mut closest_segment = 0;
    let mut closest = path[0];
    let mut best = f32::INFINITY;
    for (i, pair) in path.windows(2).enumerate() {
        let point = closest_point_on_segment(position, pair[0], pair[1]);
        let dist_sq = position.distance_squared(point);
        if dist_sq < best {
            best = dist_sq;
            closest = point;
            closest_segment = i;
        }
    }

    let near_path = distance_2d_squared(position, closest) <= sqr(path_radius);
    let goal_at_end = path
        .last()
        .is_some_and(|end| distance_2d_squared(goal, *end) <= sqr(accept_radius));

    let mut target = closest;
    let mut remaining = look_ahead.max(speed * 0.5);
    let mut segment = closest_segment;
    while remaining > 0.0 && segment + 1 < path.len() {
        let start = if segment == closest_segment {
            target
        } else {
            path[segment]
        };
        let end = path[segment + 1];
        let length = start.distance(end);
        if length >= remaining {
            target = start + (end - start).normalize_or_zero() * remaining;
            remaining = 0.0;
        } else {
            target = end;
            remaining -= length;
            segment += 1;
        }
    }

    Steering {
        valid: near_path && goal_at_end,
        direction: normalize_2d_or_zero(target - position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner_path() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(100.0, 0.0, 0.0),
            Vec3::new(100.0, 100.0, 0.0),
        ]
    }

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn test_short_path_is_invalid() {
        let steering = steer_along_path(Vec3::ZERO, Vec3::ZERO, &[Vec3::ZERO], 100.0, 10.0, 50.0, 50.0);
        assert!(!steering.valid);
        assert_eq!(steering.direction, Vec3::ZERO);

        let steering = steer_along_path(Vec3::ZERO, Vec3::ZERO, &[], 100.0, 10.0, 50.0, 50.0);
        assert_eq!(steering, Steering::default());
    }

    #[test]
    fn test_look_ahead_uses_speed() {
        let path = corner_path();
        let goal = Vec3::new(100.0, 100.0, 0.0);
        let position = Vec3::new(50.0, 10.0, 0.0);

        // max(30, 100 * 0.5) = 50 reaches the corner exactly
        let steering = steer_along_path(position, goal, &path, 100.0, 30.0, 20.0, 10.0);
        assert!(steering.valid);
        assert_close(steering.direction, Vec3::new(50.0, -10.0, 0.0).normalize());
    }

    #[test]
    fn test_look_ahead_crosses_segments() {
        let path = corner_path();
        let goal = Vec3::new(100.0, 100.0, 0.0);
        let position = Vec3::new(50.0, 10.0, 0.0);

        let steering = steer_along_path(position, goal, &path, 0.0, 80.0, 20.0, 10.0);
        assert!(steering.valid);
        assert_close(steering.direction, Vec3::new(50.0, 20.0, 0.0).normalize());
    }

    #[test]
    fn test_look_ahead_stops_at_path_end() {
        let path = corner_path();
        let goal = Vec3::new(100.0, 100.0, 0.0);
        let position = Vec3::new(100.0, 90.0, 0.0);

        let steering = steer_along_path(position, goal, &path, 0.0, 500.0, 20.0, 10.0);
        assert!(steering.valid);
        assert_close(steering.direction, Vec3::Y);
    }

    #[test]
    fn test_straying_invalidates_but_still_steers() {
        let path = corner_path();
        let goal = Vec3::new(100.0, 100.0, 0.0);

        let steering = steer_along_path(Vec3::new(50.0, 50.0, 0.0), goal, &path, 0.0, 10.0, 20.0, 10.0);
        assert!(!steering.valid);
        assert_ne!(steering.direction, Vec3::ZERO);
    }

    #[test]
    fn test_moved_goal_invalidates() {
        let path = corner_path();
        let steering = steer_along_path(
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::new(300.0, 100.0, 0.0),
            &path,
            0.0,
            10.0,
            20.0,
            10.0,
        );
        assert!(!steering.valid);
        assert_close(steering.direction, Vec3::X);
    }

    #[test]
    fn test_height_is_ignored_for_adherence() {
        let path = corner_path();
        let goal = Vec3::new(100.0, 100.0, 40.0);
        let steering = steer_along_path(Vec3::new(50.0, 5.0, 30.0), goal, &path, 0.0, 10.0, 20.0, 10.0);
        assert!(steering.valid);
        assert_eq!(steering.direction.z, 0.0);
    }
}
