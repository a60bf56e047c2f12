//! Crowd management
//!
//! A [`Crowd`] owns the agents and the subsystems they run on. The grid and
//! the optional flow field are built by the caller and handed over, so there
//! is no global state. Each [`Crowd::tick`] runs four phases:
//!
//! 1. Refill the dynamic grid layers from agent and obstacle positions.
//! 2. Compute every agent's desired velocity.
//! 3. Solve the two-phase avoidance for every agent.
//! 4. Integrate positions.
//!
//! Phases run in parallel over agents and are separated by barriers, so
//! queries never see a grid that is still being written.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use glam::{UVec2, Vec2, Vec3};
use horde_avoidance::{
    approach_velocity, AvoidancePipeline, NeighborSource, NeighborState, OrcaSolver,
};
use horde_common::{to_2d, Error, Result};
use horde_grid::{
    EdgeId, EntityRef, GridEntry, Layer, LayerMask, ObstacleArena, QueryParams, SortMode,
    SpatialGrid, TagMask,
};
use horde_path::{steer_along_path, FlowField, PathSearch};
use rayon::prelude::*;

use crate::{AgentParams, AgentState, CrowdAgent, CrowdConfig};

/// Circular obstacle
#[derive(Debug, Clone, PartialEq)]
pub struct DiscObstacle {
    pub entity: EntityRef,
    pub position: Vec3,
    pub radius: f32,
    pub is_static: bool,
}

impl DiscObstacle {
    fn layer(&self) -> Layer {
        if self.is_static {
            Layer::StaticObstacles
        } else {
            Layer::Obstacles
        }
    }
}

/// Polygon obstacle whose edges live in the crowd's arena
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonObstacle {
    pub entity: EntityRef,
    pub edges: Vec<EdgeId>,
    pub is_static: bool,
}

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub agents: usize,
    /// Entries written to the dynamic layers
    pub inserted: usize,
    pub path_recomputes: usize,
    pub elapsed: Duration,
}

/// Read-only view of the crowd used by one steering pass
struct SteerContext<'a> {
    config: &'a CrowdConfig,
    grid: &'a SpatialGrid,
    arena: &'a ObstacleArena,
    field: Option<&'a FlowField>,
}

/// Resolves neighbour state for the avoidance pipeline
struct AgentLookup<'a> {
    agents: &'a [CrowdAgent],
    index: &'a HashMap<EntityRef, usize>,
}

impl NeighborSource for AgentLookup<'_> {
    fn neighbor_state(&self, entity: EntityRef) -> Option<NeighborState> {
        let agent = &self.agents[*self.index.get(&entity)?];
        Some(NeighborState {
            velocity: agent.velocity,
            group: agent.params.avoidance.group,
            dying: agent.dying,
        })
    }
}

/// A crowd of agents moving over a shared grid, obstacle set and flow field
#[derive(Debug)]
pub struct Crowd {
    config: CrowdConfig,
    grid: SpatialGrid,
    arena: ObstacleArena,
    field: Option<FlowField>,
    agents: Vec<CrowdAgent>,
    /// Agent slot by entity
    index: HashMap<EntityRef, usize>,
    discs: Vec<DiscObstacle>,
    polygons: Vec<PolygonObstacle>,
    next_entity: u64,
}

impl Crowd {
    /// Creates an empty crowd over `grid` and, when given, `field`
    pub fn new(config: CrowdConfig, grid: SpatialGrid, field: Option<FlowField>) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Created crowd for up to {} agents over {:?}",
            config.max_agents,
            grid
        );
        Ok(Self {
            config,
            grid,
            arena: ObstacleArena::new(),
            field,
            agents: Vec::new(),
            index: HashMap::new(),
            discs: Vec::new(),
            polygons: Vec::new(),
            next_entity: 1,
        })
    }

    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn arena(&self) -> &ObstacleArena {
        &self.arena
    }

    pub fn field(&self) -> Option<&FlowField> {
        self.field.as_ref()
    }

    /// Mutable flow field, for cost and height edits between ticks
    pub fn field_mut(&mut self) -> Option<&mut FlowField> {
        self.field.as_mut()
    }

    pub fn agents(&self) -> &[CrowdAgent] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agent(&self, entity: EntityRef) -> Option<&CrowdAgent> {
        self.index.get(&entity).map(|&i| &self.agents[i])
    }

    fn agent_mut(&mut self, entity: EntityRef) -> Result<&mut CrowdAgent> {
        match self.index.get(&entity) {
            Some(&i) => Ok(&mut self.agents[i]),
            None => Err(Error::UnknownEntity(entity.0)),
        }
    }

    fn next_entity(&mut self) -> EntityRef {
        let entity = EntityRef(self.next_entity);
        self.next_entity += 1;
        entity
    }

    /// Adds an agent and returns its handle
    pub fn add_agent(&mut self, position: Vec3, params: AgentParams) -> Result<EntityRef> {
        params.validate()?;
        if self.agents.len() >= self.config.max_agents {
            return Err(Error::InvalidConfig(format!(
                "crowd is limited to {} agents",
                self.config.max_agents
            )));
        }
        if !position.is_finite() {
            return Err(Error::Grid(format!("agent position {position} is not finite")));
        }

        let entity = self.next_entity();
        self.index.insert(entity, self.agents.len());
        self.agents.push(CrowdAgent::new(entity, position, params));
        Ok(entity)
    }

    /// Removes an agent
    pub fn remove_agent(&mut self, entity: EntityRef) -> Result<()> {
        let slot = self
            .index
            .remove(&entity)
            .ok_or(Error::UnknownEntity(entity.0))?;
        self.agents.swap_remove(slot);
        if let Some(moved) = self.agents.get(slot) {
            self.index.insert(moved.entity, slot);
        }
        Ok(())
    }

    /// Sets or clears the goal of an agent. A new goal drops the old path.
    pub fn set_goal(&mut self, entity: EntityRef, goal: Option<Vec3>) -> Result<()> {
        let agent = self.agent_mut(entity)?;
        if agent.goal != goal {
            agent.path.clear();
        }
        agent.goal = goal;
        Ok(())
    }

    /// Marks an agent as dying or alive again
    pub fn set_dying(&mut self, entity: EntityRef, dying: bool) -> Result<()> {
        self.agent_mut(entity)?.dying = dying;
        Ok(())
    }

    /// Integrates the flow field towards the given world goals. Returns the
    /// number of reached cells, or zero without a flow field.
    pub fn set_flow_goals(&mut self, goals: &[Vec3]) -> usize {
        let Some(field) = self.field.as_mut() else {
            log::warn!("Flow goals set on a crowd without a flow field");
            return 0;
        };
        let coords: Vec<UVec2> = goals
            .iter()
            .filter_map(|g| field.world_to_grid(*g))
            .collect();
        field.integrate(&coords)
    }

    /// Adds a disc obstacle. Static discs are indexed once.
    pub fn add_disc_obstacle(&mut self, position: Vec3, radius: f32, is_static: bool) -> Result<EntityRef> {
        if !position.is_finite() || !(radius > 0.0 && radius.is_finite()) {
            return Err(Error::Grid(format!(
                "invalid disc obstacle at {position} with radius {radius}"
            )));
        }

        let disc = DiscObstacle {
            entity: self.next_entity(),
            position,
            radius,
            is_static,
        };
        if is_static {
            self.grid.insert(Layer::StaticObstacles, disc_entry(&disc));
        }
        let entity = disc.entity;
        self.discs.push(disc);
        Ok(entity)
    }

    /// Adds a counter-clockwise polygon obstacle
    pub fn add_polygon_obstacle(
        &mut self,
        points: &[Vec2],
        z: f32,
        height: f32,
        is_static: bool,
    ) -> Result<EntityRef> {
        let entity = self.next_entity();
        let edges = self.arena.add_polygon(points, z, height, is_static, entity)?;
        self.register_polygon(entity, edges, is_static);
        Ok(entity)
    }

    /// Adds a box obstacle rotated by `yaw_degrees` around its centre
    pub fn add_box_obstacle(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        yaw_degrees: f32,
        is_static: bool,
    ) -> Result<EntityRef> {
        let entity = self.next_entity();
        let edges = self
            .arena
            .add_box(center, half_extents, yaw_degrees, false, is_static, entity)?;
        self.register_polygon(entity, edges, is_static);
        Ok(entity)
    }

    fn register_polygon(&mut self, entity: EntityRef, edges: Vec<EdgeId>, is_static: bool) {
        if is_static {
            self.grid
                .writer()
                .insert_polygon(Layer::StaticObstacles, &self.arena, &edges, TagMask::NONE);
        }
        self.polygons.push(PolygonObstacle {
            entity,
            edges,
            is_static,
        });
    }

    /// Moves a dynamic obstacle; it is re-indexed on the next tick
    pub fn move_obstacle(&mut self, entity: EntityRef, delta: Vec3) -> Result<()> {
        if let Some(disc) = self.discs.iter_mut().find(|d| d.entity == entity) {
            if disc.is_static {
                return Err(Error::Grid(format!("obstacle {} is static", entity.0)));
            }
            disc.position += delta;
            return Ok(());
        }

        let polygon = self
            .polygons
            .iter()
            .find(|p| p.entity == entity)
            .ok_or(Error::UnknownEntity(entity.0))?;
        if polygon.is_static {
            return Err(Error::Grid(format!("obstacle {} is static", entity.0)));
        }
        self.arena.translate(&polygon.edges, delta);
        Ok(())
    }

    /// Removes an obstacle. Removing a static one rebuilds the static layer.
    pub fn remove_obstacle(&mut self, entity: EntityRef) -> Result<()> {
        let was_static = if let Some(i) = self.discs.iter().position(|d| d.entity == entity) {
            self.discs.swap_remove(i).is_static
        } else if let Some(i) = self.polygons.iter().position(|p| p.entity == entity) {
            let polygon = self.polygons.swap_remove(i);
            self.arena.remove_polygon(&polygon.edges);
            polygon.is_static
        } else {
            return Err(Error::UnknownEntity(entity.0));
        };

        if was_static {
            self.rebuild_static_layer();
        }
        Ok(())
    }

    fn rebuild_static_layer(&mut self) {
        self.grid.clear_layer(Layer::StaticObstacles);
        let writer = self.grid.writer();
        for disc in self.discs.iter().filter(|d| d.is_static) {
            writer.insert(Layer::StaticObstacles, disc_entry(disc));
        }
        for polygon in self.polygons.iter().filter(|p| p.is_static) {
            writer.insert_polygon(Layer::StaticObstacles, &self.arena, &polygon.edges, TagMask::NONE);
        }
    }

    /// Agents overlapping a sphere as of the last tick, nearest first
    pub fn agents_near(&self, position: Vec3, radius: f32) -> Vec<EntityRef> {
        let params = QueryParams::new()
            .with_layers(LayerMask::AGENTS)
            .with_sort(SortMode::NearToFar);
        self.grid.query_sphere(position, radius, &params).entities()
    }

    /// Advances the simulation by `dt` seconds
    pub fn tick(&mut self, dt: f32) -> TickStats {
        let started = Instant::now();
        let mut stats = TickStats {
            agents: self.agents.len(),
            ..Default::default()
        };
        if !(dt > 0.0 && dt.is_finite()) {
            log::warn!("Ignoring crowd tick with time step {dt}");
            return stats;
        }

        stats.inserted = self.insert_dynamic();
        stats.path_recomputes = self.update_desired(dt);
        let velocities = self.avoid(dt);
        self.integrate(&velocities, dt);

        stats.elapsed = started.elapsed();
        log::debug!(
            "Crowd tick: {} agents, {} entries, {} path recomputes in {:?}",
            stats.agents,
            stats.inserted,
            stats.path_recomputes,
            stats.elapsed
        );
        stats
    }

    fn insert_dynamic(&mut self) -> usize {
        self.grid.clear_dynamic();
        let writer = self.grid.writer();

        let agents = self
            .agents
            .par_iter()
            .filter(|agent| writer.insert(Layer::Agents, agent.grid_entry()))
            .count();

        let discs = self
            .discs
            .iter()
            .filter(|d| !d.is_static)
            .filter(|d| writer.insert(Layer::Obstacles, disc_entry(d)))
            .count();

        let edges: usize = self
            .polygons
            .par_iter()
            .filter(|p| !p.is_static)
            .map(|p| writer.insert_polygon(Layer::Obstacles, &self.arena, &p.edges, TagMask::NONE))
            .sum();

        agents + discs + edges
    }

    fn update_desired(&mut self, dt: f32) -> usize {
        let context = SteerContext {
            config: &self.config,
            grid: &self.grid,
            arena: &self.arena,
            field: self.field.as_ref(),
        };

        self.agents
            .par_iter_mut()
            .map_init(PathSearch::new, |search, agent| {
                usize::from(steer_agent(agent, &context, search, dt))
            })
            .sum()
    }

    fn avoid(&self, dt: f32) -> Vec<Vec2> {
        let lookup = AgentLookup {
            agents: &self.agents,
            index: &self.index,
        };
        let pipeline = AvoidancePipeline::new(&self.grid, Some(&self.arena));

        self.agents
            .par_iter()
            .map_init(OrcaSolver::new, |solver, agent| {
                if agent.params.avoid {
                    pipeline.solve(solver, &agent.avoiding(), &lookup, dt).velocity
                } else {
                    approach_velocity(
                        agent.velocity,
                        agent.desired,
                        agent.params.acceleration,
                        agent.params.deceleration,
                        dt,
                    )
                }
            })
            .collect()
    }

    fn integrate(&mut self, velocities: &[Vec2], dt: f32) {
        let field = self.field.as_ref();
        self.agents
            .par_iter_mut()
            .zip(velocities.par_iter())
            .for_each(|(agent, velocity)| {
                agent.velocity = *velocity;
                agent.position += velocity.extend(0.0) * dt;
                if let Some(z) = field.and_then(|f| f.height_at(agent.position)) {
                    agent.position.z = z;
                }
            });
    }
}

fn disc_entry(disc: &DiscObstacle) -> GridEntry {
    GridEntry::new(disc.entity, disc.position, disc.radius)
}

/// Sets the desired velocity of one agent. Returns true if a path was
/// searched for.
fn steer_agent(
    agent: &mut CrowdAgent,
    context: &SteerContext<'_>,
    search: &mut PathSearch,
    dt: f32,
) -> bool {
    let config = context.config;
    let Some(goal) = agent.goal else {
        agent.desired = Vec2::ZERO;
        agent.state = AgentState::Idle;
        agent.path.clear();
        return false;
    };

    let to_goal = to_2d(goal - agent.position);
    let distance = to_goal.length();
    if distance <= config.accept_radius {
        agent.desired = Vec2::ZERO;
        agent.state = AgentState::Arrived;
        agent.path.clear();
        return false;
    }

    // Do not overshoot the goal within one step
    let speed = agent.params.max_speed.min(distance / dt);
    let sight_radius = if config.sight_uses_agent_radius {
        agent.params.radius
    } else {
        0.0
    };

    let visible = context
        .grid
        .line_of_sight(agent.position, goal, sight_radius, Some(context.arena));
    let Some(field) = context.field.filter(|_| !visible) else {
        agent.desired = to_goal / distance * speed;
        agent.state = AgentState::Direct;
        agent.path.clear();
        return false;
    };

    let steer = |path: &[Vec3]| {
        steer_along_path(
            agent.position,
            goal,
            path,
            agent.params.max_speed,
            config.look_ahead,
            config.path_radius,
            config.accept_radius,
        )
    };

    let mut recomputed = false;
    let mut steering = steer(&agent.path);
    if !steering.valid {
        recomputed = true;
        let path = search.find_path(field, agent.position, goal).unwrap_or_default();
        steering = steer(&path);
        agent.path = path;
    }

    if !agent.path.is_empty() && steering.direction != Vec3::ZERO {
        agent.desired = to_2d(steering.direction) * speed;
        agent.state = AgentState::Pathing;
    } else if let Some(direction) = field.average_direction(agent.position, config.flow_sample_radius) {
        agent.desired = to_2d(direction) * speed;
        agent.state = AgentState::Flowing;
    } else {
        agent.desired = Vec2::ZERO;
        agent.state = AgentState::Stuck;
    }
    recomputed
}
