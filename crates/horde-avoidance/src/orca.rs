//! Optimal Reciprocal Collision Avoidance
//!
//! Each neighbour and obstacle edge contributes one half-plane of permitted
//! velocities. The new velocity is the point closest to the desired velocity
//! that satisfies every half-plane and lies inside the max-speed disc,
//! found by incremental 2D linear programming. When the constraints are
//! infeasible, a 3D linear program minimises the largest violation of the
//! agent constraints instead, so a velocity is always produced.

use glam::Vec2;
use horde_common::{det_2d, sqr, RVO_EPSILON};
use horde_grid::{EdgeId, ObstacleArena};

/// Share of the avoidance effort taken when both parties avoid
pub const RECIPROCAL_RESPONSIBILITY: f32 = 0.5;

/// Share of the avoidance effort taken against something that does not move
pub const FULL_RESPONSIBILITY: f32 = 1.0;

/// Directed line bounding a half-plane; permitted velocities lie on its left
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrcaLine {
    pub point: Vec2,
    pub direction: Vec2,
}

impl OrcaLine {
    pub fn new(point: Vec2, direction: Vec2) -> Self {
        Self { point, direction }
    }

    /// Positive when `v` lies outside the permitted half-plane
    #[inline]
    pub fn violation(&self, v: Vec2) -> f32 {
        det_2d(self.direction, self.point - v)
    }
}

/// Agent whose velocity is being solved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentState {
    pub position: Vec2,
    /// Velocity the agent moved with last tick
    pub velocity: Vec2,
    /// Velocity the agent would like to take
    pub desired: Vec2,
    pub radius: f32,
    pub max_speed: f32,
    pub time_horizon: f32,
    pub time_horizon_obstacle: f32,
}

/// Circular neighbour: another agent, or a disc obstacle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    /// Fraction of the avoidance this agent takes on
    pub responsibility: f32,
}

impl Neighbor {
    /// Another agent that avoids reciprocally
    pub fn agent(position: Vec2, velocity: Vec2, radius: f32) -> Self {
        Self {
            position,
            velocity,
            radius,
            responsibility: RECIPROCAL_RESPONSIBILITY,
        }
    }

    /// Disc obstacle; it never yields
    pub fn disc(position: Vec2, radius: f32) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            radius,
            responsibility: FULL_RESPONSIBILITY,
        }
    }
}

/// Reusable constraint buffers for repeated solves
#[derive(Debug, Default, Clone)]
pub struct OrcaSolver {
    lines: Vec<OrcaLine>,
    projected: Vec<OrcaLine>,
}

impl OrcaSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Half-planes built by the last solve, obstacle lines first
    pub fn lines(&self) -> &[OrcaLine] {
        &self.lines
    }

    /// Computes the collision-free velocity for `agent`.
    ///
    /// `obstacles` are polygon edges from `arena`, expected in increasing
    /// distance from the agent. `dt` is the simulation step used when two
    /// bodies already overlap.
    pub fn compute_avoiding_velocity(
        &mut self,
        agent: &AgentState,
        neighbors: &[Neighbor],
        obstacles: &[EdgeId],
        arena: Option<&ObstacleArena>,
        dt: f32,
    ) -> Vec2 {
        let max_speed = agent.max_speed.max(0.0);
        if !max_speed.is_finite() || !agent.desired.is_finite() {
            return Vec2::ZERO;
        }

        self.lines.clear();

        if let Some(arena) = arena {
            if agent.time_horizon_obstacle > 0.0 {
                for &edge in obstacles {
                    if let Some(line) = obstacle_line(agent, arena, edge, &self.lines) {
                        self.lines.push(line);
                    }
                }
            }
        }
        let obstacle_lines = self.lines.len();

        if agent.time_horizon > 0.0 {
            let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
            for neighbor in neighbors {
                self.lines.push(agent_line(agent, neighbor, inv_dt));
            }
        }

        let mut result = Vec2::ZERO;
        let failed = linear_program2(&self.lines, max_speed, agent.desired, false, &mut result);
        if failed < self.lines.len() {
            linear_program3(
                &self.lines,
                obstacle_lines,
                failed,
                max_speed,
                &mut result,
                &mut self.projected,
            );
        }

        result
    }
}

/// One-shot convenience wrapper around [`OrcaSolver`]
pub fn compute_avoiding_velocity(
    agent: &AgentState,
    neighbors: &[Neighbor],
    obstacles: &[EdgeId],
    arena: Option<&ObstacleArena>,
    dt: f32,
) -> Vec2 {
    OrcaSolver::new().compute_avoiding_velocity(agent, neighbors, obstacles, arena, dt)
}

/// Half-plane induced by a circular neighbour
fn agent_line(agent: &AgentState, other: &Neighbor, inv_dt: f32) -> OrcaLine {
    let inv_horizon = 1.0 / agent.time_horizon;
    let relative_position = other.position - agent.position;
    let relative_velocity = agent.velocity - other.velocity;
    let dist_sq = relative_position.length_squared();
    let combined_radius = agent.radius + other.radius;
    let combined_radius_sq = sqr(combined_radius);

    let direction;
    let u;

    if dist_sq > combined_radius_sq {
        // Vector from cutoff centre to relative velocity
        let w = relative_velocity - relative_position * inv_horizon;
        let w_length_sq = w.length_squared();
        let dot1 = w.dot(relative_position);

        if dot1 < 0.0 && sqr(dot1) > combined_radius_sq * w_length_sq {
            // Project on cutoff circle
            let w_length = w_length_sq.sqrt();
            let unit_w = w / w_length;
            direction = Vec2::new(unit_w.y, -unit_w.x);
            u = unit_w * (combined_radius * inv_horizon - w_length);
        } else {
            // Project on legs
            let leg = (dist_sq - combined_radius_sq).sqrt();
            let rp = relative_position;
            direction = if det_2d(rp, w) > 0.0 {
                Vec2::new(
                    rp.x * leg - rp.y * combined_radius,
                    rp.x * combined_radius + rp.y * leg,
                ) / dist_sq
            } else {
                -Vec2::new(
                    rp.x * leg + rp.y * combined_radius,
                    -rp.x * combined_radius + rp.y * leg,
                ) / dist_sq
            };
            u = direction * relative_velocity.dot(direction) - relative_velocity;
        }
    } else {
        // Already overlapping: resolve within one time step
        let w = relative_velocity - relative_position * inv_dt;
        let w_length = w.length();
        let unit_w = if w_length > RVO_EPSILON {
            w / w_length
        } else {
            (-relative_position).try_normalize().unwrap_or(Vec2::X)
        };
        direction = Vec2::new(unit_w.y, -unit_w.x);
        u = unit_w * (combined_radius * inv_dt - w_length);
    }

    OrcaLine::new(agent.velocity + u * other.responsibility, direction)
}

/// Left-leg direction of the cone from the agent tangent to a vertex disc
#[inline]
fn left_leg(rel: Vec2, leg: f32, radius: f32, dist_sq: f32) -> Vec2 {
    Vec2::new(rel.x * leg - rel.y * radius, rel.x * radius + rel.y * leg) / dist_sq
}

#[inline]
fn right_leg(rel: Vec2, leg: f32, radius: f32, dist_sq: f32) -> Vec2 {
    Vec2::new(rel.x * leg + rel.y * radius, -rel.x * radius + rel.y * leg) / dist_sq
}

#[inline]
fn perp_left(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

/// Half-plane induced by a polygon edge, or `None` when the edge is already
/// covered by an earlier obstacle line or contributes nothing
fn obstacle_line(
    agent: &AgentState,
    arena: &ObstacleArena,
    edge: EdgeId,
    existing: &[OrcaLine],
) -> Option<OrcaLine> {
    let inv_horizon = 1.0 / agent.time_horizon_obstacle;
    let radius = agent.radius;
    let radius_sq = sqr(radius);
    let position = agent.position;
    let velocity = agent.velocity;

    let mut id1 = edge;
    let mut id2 = arena.get(edge)?.next;
    let mut o1 = arena.get(id1)?;
    let mut o2 = arena.get(id2)?;

    let rel1 = o1.point - position;
    let rel2 = o2.point - position;

    // Skip when a previous obstacle line already keeps the whole edge away
    let covered = existing.iter().any(|line| {
        det_2d(rel1 * inv_horizon - line.point, line.direction) - inv_horizon * radius
            >= -RVO_EPSILON
            && det_2d(rel2 * inv_horizon - line.point, line.direction) - inv_horizon * radius
                >= -RVO_EPSILON
    });
    if covered {
        return None;
    }

    let dist_sq1 = rel1.length_squared();
    let dist_sq2 = rel2.length_squared();
    let obstacle_vector = o2.point - o1.point;
    let ov_len_sq = obstacle_vector.length_squared();
    let s = if ov_len_sq > RVO_EPSILON {
        (-rel1).dot(obstacle_vector) / ov_len_sq
    } else {
        0.0
    };
    let dist_sq_line = (-rel1 - obstacle_vector * s).length_squared();

    // Collision with the edge itself
    if s < 0.0 && dist_sq1 <= radius_sq {
        return o1
            .convex
            .then(|| OrcaLine::new(Vec2::ZERO, perp_left(rel1).normalize_or_zero()));
    } else if s > 1.0 && dist_sq2 <= radius_sq {
        return (o2.convex && det_2d(rel2, o2.unit_dir) >= 0.0)
            .then(|| OrcaLine::new(Vec2::ZERO, perp_left(rel2).normalize_or_zero()));
    } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
        return Some(OrcaLine::new(Vec2::ZERO, -o1.unit_dir));
    }

    // No collision: find the legs of the velocity obstacle
    let mut left_dir;
    let mut right_dir;

    if s < 0.0 && dist_sq_line <= radius_sq {
        // Seen obliquely; only the left vertex matters
        if !o1.convex {
            return None;
        }
        id2 = id1;
        o2 = o1;
        let leg1 = (dist_sq1 - radius_sq).max(0.0).sqrt();
        left_dir = left_leg(rel1, leg1, radius, dist_sq1);
        right_dir = right_leg(rel1, leg1, radius, dist_sq1);
    } else if s > 1.0 && dist_sq_line <= radius_sq {
        // Seen obliquely; only the right vertex matters
        if !o2.convex {
            return None;
        }
        id1 = id2;
        o1 = o2;
        let leg2 = (dist_sq2 - radius_sq).max(0.0).sqrt();
        left_dir = left_leg(rel2, leg2, radius, dist_sq2);
        right_dir = right_leg(rel2, leg2, radius, dist_sq2);
    } else {
        left_dir = if o1.convex {
            let leg1 = (dist_sq1 - radius_sq).max(0.0).sqrt();
            left_leg(rel1, leg1, radius, dist_sq1)
        } else {
            -o1.unit_dir
        };
        right_dir = if o2.convex {
            let leg2 = (dist_sq2 - radius_sq).max(0.0).sqrt();
            right_leg(rel2, leg2, radius, dist_sq2)
        } else {
            o1.unit_dir
        };
    }

    // A leg pointing into the neighbouring edge is replaced by that edge
    let left_neighbor = arena.get(o1.prev)?;
    let mut left_foreign = false;
    let mut right_foreign = false;

    if o1.convex && det_2d(left_dir, -left_neighbor.unit_dir) >= 0.0 {
        left_dir = -left_neighbor.unit_dir;
        left_foreign = true;
    }
    if o2.convex && det_2d(right_dir, o2.unit_dir) <= 0.0 {
        right_dir = o2.unit_dir;
        right_foreign = true;
    }

    let same_vertex = id1 == id2;
    let left_cutoff = (o1.point - position) * inv_horizon;
    let right_cutoff = (o2.point - position) * inv_horizon;
    let cutoff_vec = right_cutoff - left_cutoff;

    let t = if same_vertex {
        0.5
    } else {
        (velocity - left_cutoff).dot(cutoff_vec) / cutoff_vec.length_squared()
    };
    let t_left = (velocity - left_cutoff).dot(left_dir);
    let t_right = (velocity - right_cutoff).dot(right_dir);

    if (t < 0.0 && t_left < 0.0) || (same_vertex && t_left < 0.0 && t_right < 0.0) {
        // Project on the left cutoff circle
        let unit_w = (velocity - left_cutoff).normalize_or_zero();
        return Some(OrcaLine::new(
            left_cutoff + unit_w * (radius * inv_horizon),
            Vec2::new(unit_w.y, -unit_w.x),
        ));
    } else if t > 1.0 && t_right < 0.0 {
        // Project on the right cutoff circle
        let unit_w = (velocity - right_cutoff).normalize_or_zero();
        return Some(OrcaLine::new(
            right_cutoff + unit_w * (radius * inv_horizon),
            Vec2::new(unit_w.y, -unit_w.x),
        ));
    }

    // Project on whichever of left leg, right leg or cutoff line is closest
    let dist_sq_cutoff = if t < 0.0 || t > 1.0 || same_vertex {
        f32::INFINITY
    } else {
        (velocity - (left_cutoff + cutoff_vec * t)).length_squared()
    };
    let dist_sq_left = if t_left < 0.0 {
        f32::INFINITY
    } else {
        (velocity - (left_cutoff + left_dir * t_left)).length_squared()
    };
    let dist_sq_right = if t_right < 0.0 {
        f32::INFINITY
    } else {
        (velocity - (right_cutoff + right_dir * t_right)).length_squared()
    };

    if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
        let direction = -o1.unit_dir;
        Some(OrcaLine::new(
            left_cutoff + perp_left(direction) * (radius * inv_horizon),
            direction,
        ))
    } else if dist_sq_left <= dist_sq_right {
        if left_foreign {
            return None;
        }
        Some(OrcaLine::new(
            left_cutoff + perp_left(left_dir) * (radius * inv_horizon),
            left_dir,
        ))
    } else {
        if right_foreign {
            return None;
        }
        let direction = -right_dir;
        Some(OrcaLine::new(
            right_cutoff + perp_left(direction) * (radius * inv_horizon),
            direction,
        ))
    }
}

/// Optimises along line `line_no`, subject to all earlier lines and the
/// speed disc. Returns false when the feasible interval is empty.
pub fn linear_program1(
    lines: &[OrcaLine],
    line_no: usize,
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    result: &mut Vec2,
) -> bool {
    let line = lines[line_no];
    let dot = line.point.dot(line.direction);
    let discriminant = sqr(dot) + sqr(radius) - line.point.length_squared();

    if discriminant < 0.0 {
        // Max-speed disc fully invalidates this line
        return false;
    }

    let sqrt_disc = discriminant.sqrt();
    let mut t_left = -dot - sqrt_disc;
    let mut t_right = -dot + sqrt_disc;

    for earlier in &lines[..line_no] {
        let denominator = det_2d(line.direction, earlier.direction);
        let numerator = det_2d(earlier.direction, line.point - earlier.point);

        if denominator.abs() <= RVO_EPSILON {
            // Parallel lines
            if numerator < 0.0 {
                return false;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return false;
        }
    }

    *result = if direction_opt {
        // Optimise direction
        if opt_velocity.dot(line.direction) > 0.0 {
            line.point + line.direction * t_right
        } else {
            line.point + line.direction * t_left
        }
    } else {
        // Optimise closest point
        let t = line.direction.dot(opt_velocity - line.point);
        line.point + line.direction * t.clamp(t_left, t_right)
    };

    true
}

/// Incremental 2D linear program. Returns the index of the first line that
/// could not be satisfied, or `lines.len()` on success.
pub fn linear_program2(
    lines: &[OrcaLine],
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    result: &mut Vec2,
) -> usize {
    *result = if direction_opt {
        // `opt_velocity` is a unit direction here
        opt_velocity * radius
    } else if opt_velocity.length_squared() > sqr(radius) {
        opt_velocity.normalize_or_zero() * radius
    } else {
        opt_velocity
    };

    for i in 0..lines.len() {
        if lines[i].violation(*result) > 0.0 {
            let previous = *result;
            if !linear_program1(lines, i, radius, opt_velocity, direction_opt, result) {
                *result = previous;
                return i;
            }
        }
    }

    lines.len()
}

/// 3D fallback: minimises the largest violation of the lines from
/// `begin_line` on, treating the first `obstacle_lines` as hard constraints
pub fn linear_program3(
    lines: &[OrcaLine],
    obstacle_lines: usize,
    begin_line: usize,
    radius: f32,
    result: &mut Vec2,
    projected: &mut Vec<OrcaLine>,
) {
    let mut distance = 0.0f32;

    for i in begin_line..lines.len() {
        let line_i = lines[i];
        if line_i.violation(*result) <= distance {
            continue;
        }

        // Result does not satisfy constraint of line i
        projected.clear();
        projected.extend_from_slice(&lines[..obstacle_lines]);

        // Empty when line i is itself an obstacle line
        let agent_lines = lines.get(obstacle_lines..i).unwrap_or(&[]);
        for line_j in agent_lines {
            let determinant = det_2d(line_i.direction, line_j.direction);
            let point = if determinant.abs() <= RVO_EPSILON {
                if line_i.direction.dot(line_j.direction) > 0.0 {
                    // Same direction
                    continue;
                }
                // Opposite direction
                (line_i.point + line_j.point) * 0.5
            } else {
                line_i.point
                    + line_i.direction
                        * (det_2d(line_j.direction, line_i.point - line_j.point) / determinant)
            };
            let direction = (line_j.direction - line_i.direction).normalize_or_zero();
            projected.push(OrcaLine::new(point, direction));
        }

        let previous = *result;
        let optimise = perp_left(line_i.direction);
        if linear_program2(projected, radius, optimise, true, result) < projected.len() {
            // Only reachable through floating point error; keep the old result
            *result = previous;
        }

        distance = line_i.violation(*result);
    }
}
