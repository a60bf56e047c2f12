//! Per-agent avoidance tunables

use horde_common::{Error, Result};

/// Highest collision group index
pub const MAX_COLLISION_GROUP: u8 = 15;

/// Set of collision groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CollisionGroups(pub u16);

impl CollisionGroups {
    pub const NONE: CollisionGroups = CollisionGroups(0);

    /// Set holding a single group
    pub fn only(group: u8) -> Self {
        CollisionGroups(1 << (group.min(MAX_COLLISION_GROUP)))
    }

    pub fn contains(&self, group: u8) -> bool {
        group <= MAX_COLLISION_GROUP && self.0 & (1 << group) != 0
    }

    pub fn insert(&mut self, group: u8) {
        if group <= MAX_COLLISION_GROUP {
            self.0 |= 1 << group;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Avoidance tunables carried by each agent
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct AvoidanceConfig {
    /// Extra distance beyond the agent radius searched for neighbours
    pub trace_distance: f32,
    /// Maximum number of agents considered per solve
    pub max_neighbors: usize,
    /// Look-ahead time for agent-agent avoidance
    pub time_horizon_agent: f32,
    /// Look-ahead time for agent-obstacle avoidance
    pub time_horizon_obstacle: f32,
    /// Collision group this agent belongs to
    pub group: u8,
    /// Agents in these groups are not avoided
    pub ignore_groups: CollisionGroups,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            trace_distance: 150.0,
            max_neighbors: 10,
            time_horizon_agent: 1.0,
            time_horizon_obstacle: 0.1,
            group: 0,
            ignore_groups: CollisionGroups::NONE,
        }
    }
}

impl AvoidanceConfig {
    pub fn with_trace_distance(mut self, distance: f32) -> Self {
        self.trace_distance = distance;
        self
    }

    pub fn with_max_neighbors(mut self, count: usize) -> Self {
        self.max_neighbors = count;
        self
    }

    pub fn with_time_horizons(mut self, agent: f32, obstacle: f32) -> Self {
        self.time_horizon_agent = agent;
        self.time_horizon_obstacle = obstacle;
        self
    }

    pub fn with_group(mut self, group: u8) -> Self {
        self.group = group;
        self
    }

    pub fn with_ignore_groups(mut self, groups: CollisionGroups) -> Self {
        self.ignore_groups = groups;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.trace_distance.is_finite() || self.trace_distance < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "trace distance must be non-negative, got {}",
                self.trace_distance
            )));
        }

        if !(self.time_horizon_agent > 0.0 && self.time_horizon_agent.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "agent time horizon must be positive, got {}",
                self.time_horizon_agent
            )));
        }

        if !(self.time_horizon_obstacle > 0.0 && self.time_horizon_obstacle.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "obstacle time horizon must be positive, got {}",
                self.time_horizon_obstacle
            )));
        }

        if self.group > MAX_COLLISION_GROUP {
            return Err(Error::InvalidConfig(format!(
                "collision group {} exceeds the maximum of {}",
                self.group, MAX_COLLISION_GROUP
            )));
        }

        Ok(())
    }
}
