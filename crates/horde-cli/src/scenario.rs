//! JSON scenario files

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{UVec2, Vec2, Vec3};
use horde_crowd::{AgentParams, Crowd, CrowdConfig};
use horde_grid::{EntityRef, GridConfig, SpatialGrid};
use horde_path::{FlowField, FlowFieldConfig, IMPASSABLE};
use serde::{Deserialize, Serialize};

/// An agent to spawn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpawn {
    pub position: Vec3,
    #[serde(default)]
    pub goal: Option<Vec3>,
    #[serde(default)]
    pub params: AgentParams,
}

/// An obstacle to place before the first tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObstacleDef {
    Disc {
        position: Vec3,
        radius: f32,
        #[serde(default = "default_static")]
        is_static: bool,
    },
    /// Counter-clockwise outline
    Polygon {
        points: Vec<Vec2>,
        z: f32,
        height: f32,
        #[serde(default = "default_static")]
        is_static: bool,
    },
    Box {
        center: Vec3,
        half_extents: Vec3,
        #[serde(default)]
        yaw: f32,
        #[serde(default = "default_static")]
        is_static: bool,
    },
}

fn default_static() -> bool {
    true
}

/// Everything needed to run a crowd from the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub grid: GridConfig,
    pub field: Option<FlowFieldConfig>,
    /// Flow-field cells marked impassable
    pub blocked_cells: Vec<[u32; 2]>,
    pub crowd: CrowdConfig,
    pub agents: Vec<AgentSpawn>,
    pub obstacles: Vec<ObstacleDef>,
    /// Targets of the flow-field integration
    pub flow_goals: Vec<Vec3>,
    pub ticks: usize,
    pub dt: f32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            field: None,
            blocked_cells: Vec::new(),
            crowd: CrowdConfig::default(),
            agents: Vec::new(),
            obstacles: Vec::new(),
            flow_goals: Vec::new(),
            ticks: 100,
            dt: 0.1,
        }
    }
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))?;
        if !(scenario.dt > 0.0 && scenario.dt.is_finite()) {
            return Err(anyhow!("Scenario time step must be positive, got {}", scenario.dt));
        }
        Ok(scenario)
    }

    /// Builds the flow field with the blocked cells applied
    pub fn build_field(&self) -> Result<Option<FlowField>> {
        let Some(config) = &self.field else {
            return Ok(None);
        };
        let mut field = FlowField::new(config.clone()).context("Invalid flow field")?;
        for &[x, y] in &self.blocked_cells {
            let coord = UVec2::new(x, y);
            if !field.set_cost(coord, IMPASSABLE) {
                log::warn!("Blocked cell {coord} is outside the flow field");
            }
        }
        Ok(Some(field))
    }

    /// Builds the crowd and returns it with the spawned agent handles
    pub fn build_crowd(&self) -> Result<(Crowd, Vec<EntityRef>)> {
        let grid = SpatialGrid::new(self.grid.clone()).context("Invalid grid")?;
        let mut crowd = Crowd::new(self.crowd.clone(), grid, self.build_field()?)
            .context("Invalid crowd configuration")?;

        for (i, obstacle) in self.obstacles.iter().enumerate() {
            let added = match obstacle {
                ObstacleDef::Disc {
                    position,
                    radius,
                    is_static,
                } => crowd.add_disc_obstacle(*position, *radius, *is_static),
                ObstacleDef::Polygon {
                    points,
                    z,
                    height,
                    is_static,
                } => crowd.add_polygon_obstacle(points, *z, *height, *is_static),
                ObstacleDef::Box {
                    center,
                    half_extents,
                    yaw,
                    is_static,
                } => crowd.add_box_obstacle(*center, *half_extents, *yaw, *is_static),
            };
            added.with_context(|| format!("Failed to add obstacle {i}"))?;
        }

        if !self.flow_goals.is_empty() {
            let reached = crowd.set_flow_goals(&self.flow_goals);
            log::info!("Flow field reaches {reached} cells");
        }

        let mut agents = Vec::with_capacity(self.agents.len());
        for (i, spawn) in self.agents.iter().enumerate() {
            let agent = crowd
                .add_agent(spawn.position, spawn.params.clone())
                .with_context(|| format!("Failed to add agent {i}"))?;
            crowd.set_goal(agent, spawn.goal)?;
            agents.push(agent);
        }

        Ok((crowd, agents))
    }
}
