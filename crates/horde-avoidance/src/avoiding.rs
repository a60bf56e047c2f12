//! Two-phase avoidance against the spatial grid
//!
//! Phase one gathers nearby agents and solves against them alone, with the
//! desired speed as the limit. That result is reached at the agent's
//! acceleration or deceleration rate, and phase two takes the ramped velocity
//! as its desired velocity against nearby disc obstacles and polygon edges.
//! Agents first yield to each other and then both yield to geometry.

use glam::{Vec2, Vec3};
use horde_common::{distance_point_segment_2d_squared, left_of, sqr, to_2d, OrderedF32};
use horde_grid::{
    EdgeId, EntityRef, EntryShape, Filter, GridEntry, KeepCount, LayerMask, ObstacleArena,
    QueryParams, SpatialGrid,
};

use crate::{AgentState, AvoidanceConfig, Neighbor, OrcaSolver};

/// Per-tick state of an agent that avoids
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Avoiding {
    pub entity: EntityRef,
    pub position: Vec3,
    /// Velocity the agent moved with last tick
    pub velocity: Vec2,
    /// Velocity steering asks for
    pub desired: Vec2,
    pub radius: f32,
    /// Speed gained per second; 0 reaches the target at once
    pub acceleration: f32,
    /// Speed lost per second; 0 reaches the target at once
    pub deceleration: f32,
    /// Dying agents only avoid other dying agents
    pub dying: bool,
    pub config: AvoidanceConfig,
}

/// Moves `current` towards `target` by at most `rate * dt`. The rate is
/// `acceleration` when the target is faster than the current velocity and
/// `deceleration` otherwise; a rate of 0 jumps straight to the target.
pub fn approach_velocity(
    current: Vec2,
    target: Vec2,
    acceleration: f32,
    deceleration: f32,
    dt: f32,
) -> Vec2 {
    let rate = if target.length_squared() > current.length_squared() {
        acceleration
    } else {
        deceleration
    };
    let delta = target - current;
    let max_step = rate * dt;
    if rate <= 0.0 || delta.length_squared() <= sqr(max_step) {
        target
    } else {
        current + delta.normalize() * max_step
    }
}

/// What the avoidance pipeline needs to know about a neighbouring agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborState {
    pub velocity: Vec2,
    pub group: u8,
    pub dying: bool,
}

/// Lookup from grid entities to their avoidance state
pub trait NeighborSource: Sync {
    /// Returns `None` for entities that should not be avoided
    fn neighbor_state(&self, entity: EntityRef) -> Option<NeighborState>;
}

/// Obstacles near an agent
#[derive(Debug, Clone, Default)]
pub struct ObstacleNeighbors {
    pub discs: Vec<Neighbor>,
    /// Edges facing the agent, nearest first
    pub edges: Vec<EdgeId>,
}

/// Velocities produced by the two phases
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidanceOutcome {
    /// Result of avoiding agents only, after the acceleration limits
    pub agent_velocity: Vec2,
    /// Final velocity after also avoiding obstacles
    pub velocity: Vec2,
    pub neighbor_count: usize,
    pub obstacle_count: usize,
}

/// Runs the two-phase solve against an injected grid and obstacle arena
#[derive(Debug, Clone, Copy)]
pub struct AvoidancePipeline<'a> {
    grid: &'a SpatialGrid,
    arena: Option<&'a ObstacleArena>,
}

impl<'a> AvoidancePipeline<'a> {
    pub fn new(grid: &'a SpatialGrid, arena: Option<&'a ObstacleArena>) -> Self {
        Self { grid, arena }
    }

    /// Up to `max_neighbors` nearest agents that this agent has to avoid
    pub fn gather_neighbors<S: NeighborSource>(&self, agent: &Avoiding, source: &S) -> Vec<Neighbor> {
        let config = &agent.config;
        if config.max_neighbors == 0 {
            return Vec::new();
        }

        let accept = |entry: &GridEntry| {
            source.neighbor_state(entry.entity).is_some_and(|state| {
                !config.ignore_groups.contains(state.group) && (!agent.dying || state.dying)
            })
        };
        let ignore = [agent.entity];
        let params = QueryParams::new()
            .with_layers(LayerMask::AGENTS)
            .with_keep(KeepCount::Nearest(config.max_neighbors))
            .ignoring(&ignore)
            .with_filter(Filter::default().with_predicate(&accept));

        let range = config.trace_distance + agent.radius;
        self.grid
            .query_sphere(agent.position, range, &params)
            .into_iter()
            .filter_map(|hit| {
                let state = source.neighbor_state(hit.entity)?;
                Some(Neighbor::agent(to_2d(hit.position), state.velocity, hit.radius))
            })
            .collect()
    }

    /// Disc obstacles and facing edges within `range` of the agent
    pub fn gather_obstacles(&self, agent: &Avoiding, range: f32) -> ObstacleNeighbors {
        let mut found = ObstacleNeighbors::default();
        let ignore = [agent.entity];
        let params = QueryParams::new()
            .with_layers(LayerMask::ALL_OBSTACLES)
            .ignoring(&ignore);

        let position = to_2d(agent.position);
        let z_min = agent.position.z - agent.radius;
        let z_max = agent.position.z + agent.radius;
        let range_sq = sqr(range);
        let mut edges: Vec<(f32, EdgeId)> = Vec::new();

        for hit in self.grid.query_sphere(agent.position, range, &params) {
            match (hit.shape, self.arena) {
                (EntryShape::Edge(id), Some(arena)) => {
                    let Some(edge) = arena.get(id) else {
                        continue;
                    };
                    if !edge.overlaps_height(z_min, z_max) {
                        continue;
                    }
                    let end = arena.end_point(id);
                    // Only the side facing away from the polygon interior
                    if left_of(edge.point, end, position) >= 0.0 {
                        continue;
                    }
                    let dist_sq = distance_point_segment_2d_squared(position, edge.point, end);
                    if dist_sq < range_sq {
                        edges.push((dist_sq, id));
                    }
                }
                (EntryShape::Edge(_), None) => {}
                (EntryShape::Sphere, _) => {
                    found.discs.push(Neighbor::disc(to_2d(hit.position), hit.radius));
                }
            }
        }

        edges.sort_by_key(|(d, id)| (OrderedF32(*d), *id));
        found.edges = edges.into_iter().map(|(_, id)| id).collect();
        found
    }

    /// Full two-phase solve for one agent
    pub fn solve<S: NeighborSource>(
        &self,
        solver: &mut OrcaSolver,
        agent: &Avoiding,
        source: &S,
        dt: f32,
    ) -> AvoidanceOutcome {
        let config = &agent.config;
        let position = to_2d(agent.position);

        // Phase one: agents only, limited to the desired speed
        let neighbors = self.gather_neighbors(agent, source);
        let phase_one = AgentState {
            position,
            velocity: agent.velocity,
            desired: agent.desired,
            radius: agent.radius,
            max_speed: agent.desired.length(),
            time_horizon: config.time_horizon_agent,
            time_horizon_obstacle: config.time_horizon_obstacle,
        };
        let agent_velocity = if neighbors.is_empty() {
            agent.desired
        } else {
            solver.compute_avoiding_velocity(&phase_one, &neighbors, &[], None, dt)
        };
        let agent_velocity = approach_velocity(
            agent.velocity,
            agent_velocity,
            agent.acceleration,
            agent.deceleration,
            dt,
        );

        // Phase two: obstacles, desired velocity is the phase-one result.
        // Discs are obstacles too and use the obstacle horizon.
        let max_speed = agent.velocity.length().max(agent_velocity.length());
        let range = config.time_horizon_obstacle * max_speed + agent.radius;
        let obstacles = self.gather_obstacles(agent, range);
        let phase_two = AgentState {
            desired: agent_velocity,
            max_speed,
            time_horizon: config.time_horizon_obstacle,
            ..phase_one
        };
        let velocity = if obstacles.discs.is_empty() && obstacles.edges.is_empty() {
            agent_velocity
        } else {
            solver.compute_avoiding_velocity(
                &phase_two,
                &obstacles.discs,
                &obstacles.edges,
                self.arena,
                dt,
            )
        };

        log::trace!(
            "{:?}: {} neighbours, {} obstacles, velocity {:?}",
            agent.entity,
            neighbors.len(),
            obstacles.discs.len() + obstacles.edges.len(),
            velocity
        );

        AvoidanceOutcome {
            agent_velocity,
            velocity,
            neighbor_count: neighbors.len(),
            obstacle_count: obstacles.discs.len() + obstacles.edges.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollisionGroups;
    use glam::UVec3;
    use horde_grid::{GridConfig, Layer, TagMask};
    use std::collections::HashMap;

    struct Agents(HashMap<EntityRef, NeighborState>);

    impl NeighborSource for Agents {
        fn neighbor_state(&self, entity: EntityRef) -> Option<NeighborState> {
            self.0.get(&entity).copied()
        }
    }

    fn grid() -> SpatialGrid {
        SpatialGrid::new(GridConfig::from_min_corner(
            Vec3::ZERO,
            Vec3::splat(100.0),
            UVec3::new(10, 10, 1),
        ))
        .unwrap()
    }

    fn avoiding(id: u64, position: Vec3) -> Avoiding {
        Avoiding {
            entity: EntityRef(id),
            position,
            velocity: Vec2::new(10.0, 0.0),
            desired: Vec2::new(10.0, 0.0),
            radius: 10.0,
            acceleration: 0.0,
            deceleration: 0.0,
            dying: false,
            config: AvoidanceConfig::default(),
        }
    }

    fn state(group: u8, dying: bool) -> NeighborState {
        NeighborState {
            velocity: Vec2::ZERO,
            group,
            dying,
        }
    }

    #[test]
    fn test_gather_neighbors_filters() {
        let mut grid = grid();
        let mut states = HashMap::new();
        for (id, x, group, dying) in [
            (1u64, 500.0, 0u8, false),
            (2, 520.0, 0, false),
            (3, 540.0, 3, false),
            (4, 560.0, 0, true),
            (5, 990.0, 0, false),
        ] {
            grid.insert(
                Layer::Agents,
                GridEntry::new(EntityRef(id), Vec3::new(x, 500.0, 50.0), 10.0),
            );
            states.insert(EntityRef(id), state(group, dying));
        }
        let source = Agents(states);
        let pipeline = AvoidancePipeline::new(&grid, None);

        let mut agent = avoiding(1, Vec3::new(500.0, 500.0, 50.0));
        agent.config.ignore_groups = CollisionGroups::only(3);
        let found = pipeline.gather_neighbors(&agent, &source);
        // Self, the ignored group and the far agent are excluded
        assert_eq!(found.len(), 2);

        agent.dying = true;
        let found = pipeline.gather_neighbors(&agent, &source);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, Vec2::new(560.0, 500.0));

        agent.dying = false;
        agent.config.max_neighbors = 1;
        let found = pipeline.gather_neighbors(&agent, &source);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, Vec2::new(520.0, 500.0));
    }

    #[test]
    fn test_gather_obstacles_keeps_facing_edges() {
        let mut grid = grid();
        let mut arena = ObstacleArena::new();
        let ids = arena
            .add_box(
                Vec3::new(500.0, 600.0, 50.0),
                Vec3::new(100.0, 50.0, 50.0),
                0.0,
                false,
                true,
                EntityRef(100),
            )
            .unwrap();
        grid.writer()
            .insert_polygon(Layer::StaticObstacles, &arena, &ids, TagMask::NONE);
        grid.insert(
            Layer::Obstacles,
            GridEntry::new(EntityRef(200), Vec3::new(450.0, 500.0, 50.0), 15.0),
        );

        let pipeline = AvoidancePipeline::new(&grid, Some(&arena));
        let agent = avoiding(1, Vec3::new(500.0, 520.0, 50.0));
        let found = pipeline.gather_obstacles(&agent, 60.0);

        // Only the bottom edge faces the agent; the far side edges are behind the box
        assert_eq!(found.edges, vec![ids[0]]);
        assert_eq!(found.discs.len(), 1);
        assert_eq!(found.discs[0].responsibility, crate::FULL_RESPONSIBILITY);
    }

    #[test]
    fn test_solve_without_neighbors_keeps_desired() {
        let grid = grid();
        let pipeline = AvoidancePipeline::new(&grid, None);
        let source = Agents(HashMap::new());
        let mut solver = OrcaSolver::new();

        let agent = avoiding(1, Vec3::new(500.0, 500.0, 50.0));
        let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);
        assert_eq!(outcome.velocity, agent.desired);
        assert_eq!(outcome.neighbor_count, 0);
        assert_eq!(outcome.obstacle_count, 0);
    }

    #[test]
    fn test_approach_velocity_rates() {
        let still = Vec2::ZERO;
        let target = Vec2::new(300.0, 0.0);
        assert_eq!(approach_velocity(still, target, 1000.0, 500.0, 0.1), Vec2::new(100.0, 0.0));
        assert_eq!(approach_velocity(target, still, 1000.0, 500.0, 0.1), Vec2::new(250.0, 0.0));
        // Close enough to land on the target
        assert_eq!(approach_velocity(Vec2::new(250.0, 0.0), target, 1000.0, 500.0, 0.1), target);
        // Zero rates are unlimited
        assert_eq!(approach_velocity(still, target, 0.0, 0.0, 0.1), target);

        // Turning at constant speed uses the deceleration rate
        let turned = approach_velocity(target, Vec2::new(0.0, 300.0), 1000.0, 100.0, 0.1);
        assert!((turned.distance(target) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_solve_ramps_towards_phase_one() {
        let grid = grid();
        let pipeline = AvoidancePipeline::new(&grid, None);
        let source = Agents(HashMap::new());
        let mut solver = OrcaSolver::new();

        let mut agent = avoiding(1, Vec3::new(500.0, 500.0, 50.0));
        agent.velocity = Vec2::ZERO;
        agent.desired = Vec2::new(300.0, 0.0);
        agent.acceleration = 1000.0;
        let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);
        assert_eq!(outcome.agent_velocity, Vec2::new(100.0, 0.0));
        assert_eq!(outcome.velocity, Vec2::new(100.0, 0.0));
    }

    #[test]
    fn test_solve_stops_before_wall() {
        let mut grid = grid();
        let mut arena = ObstacleArena::new();
        let ids = arena
            .add_box(
                Vec3::new(500.0, 600.0, 50.0),
                Vec3::new(100.0, 50.0, 50.0),
                0.0,
                false,
                true,
                EntityRef(100),
            )
            .unwrap();
        grid.writer()
            .insert_polygon(Layer::StaticObstacles, &arena, &ids, TagMask::NONE);

        let pipeline = AvoidancePipeline::new(&grid, Some(&arena));
        let source = Agents(HashMap::new());
        let mut solver = OrcaSolver::new();

        let mut agent = avoiding(1, Vec3::new(500.0, 535.0, 50.0));
        agent.velocity = Vec2::new(0.0, 100.0);
        agent.desired = Vec2::new(0.0, 100.0);
        let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);

        // Gap to the wall is 5 after the radius; the obstacle horizon is 0.1s
        assert_eq!(outcome.agent_velocity, agent.desired);
        assert_eq!(outcome.obstacle_count, 1);
        assert!(outcome.velocity.y > 0.0);
        assert!(outcome.velocity.y * 0.1 <= 5.0 + 1e-3);
        assert!(outcome.velocity.x.abs() < 1e-3);
    }

    #[test]
    fn test_disc_obstacles_use_obstacle_horizon() {
        let mut grid = grid();
        grid.insert(
            Layer::Obstacles,
            GridEntry::new(EntityRef(200), Vec3::new(525.0, 500.0, 50.0), 10.0),
        );
        let pipeline = AvoidancePipeline::new(&grid, None);
        let source = Agents(HashMap::new());
        let mut solver = OrcaSolver::new();

        let mut agent = avoiding(1, Vec3::new(500.0, 500.0, 50.0));
        agent.velocity = Vec2::new(100.0, 0.0);
        agent.desired = Vec2::new(100.0, 0.0);
        let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);

        // Gap of 5 over the 0.1s obstacle horizon caps the approach at 50
        assert_eq!(outcome.obstacle_count, 1);
        assert!((outcome.velocity - Vec2::new(50.0, 0.0)).length() < 1e-2, "{}", outcome.velocity);
    }

    #[test]
    fn test_solve_while_overlapping_wall() {
        let mut grid = grid();
        let mut arena = ObstacleArena::new();
        let ids = arena
            .add_box(
                Vec3::new(500.0, 600.0, 50.0),
                Vec3::new(100.0, 50.0, 50.0),
                0.0,
                false,
                true,
                EntityRef(100),
            )
            .unwrap();
        grid.writer()
            .insert_polygon(Layer::StaticObstacles, &arena, &ids, TagMask::NONE);

        let pipeline = AvoidancePipeline::new(&grid, Some(&arena));
        let source = Agents(HashMap::new());
        let mut solver = OrcaSolver::new();

        // Radius 10 reaches 5 past the bottom edge at y = 550
        for x in [400.0, 450.0, 500.0, 599.0] {
            let mut agent = avoiding(1, Vec3::new(x, 545.0, 50.0));
            agent.velocity = Vec2::new(0.0, 100.0);
            agent.desired = Vec2::new(0.0, 100.0);
            let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);

            assert!(outcome.velocity.is_finite());
            assert!(outcome.velocity.y <= 1e-3, "x {x}: {}", outcome.velocity);
        }

        // Overlapping the corner only: slide off without closing in on it
        let mut agent = avoiding(1, Vec3::new(605.0, 545.0, 50.0));
        agent.velocity = Vec2::new(0.0, 100.0);
        agent.desired = Vec2::new(0.0, 100.0);
        let outcome = pipeline.solve(&mut solver, &agent, &source, 0.1);
        let to_corner = Vec2::new(-1.0, 1.0).normalize();
        assert!(outcome.velocity.is_finite());
        assert!(outcome.velocity.dot(to_corner) <= 1e-3, "{}", outcome.velocity);
    }
}
