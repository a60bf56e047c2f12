//! Crowd-wide settings

use horde_common::{Error, Result};

/// Settings shared by every agent of a crowd
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct CrowdConfig {
    /// Maximum number of agents
    pub max_agents: usize,
    /// Minimum distance ahead on the path that agents steer towards
    pub look_ahead: f32,
    /// Agents further than this from their path request a new one
    pub path_radius: f32,
    /// Agents this close to their goal stop
    pub accept_radius: f32,
    /// Radius of the flow-field sample used when there is no path
    pub flow_sample_radius: f32,
    /// Use the agent radius for goal line-of-sight traces
    pub sight_uses_agent_radius: bool,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            max_agents: 4096,
            look_ahead: 150.0,
            path_radius: 200.0,
            accept_radius: 50.0,
            flow_sample_radius: 100.0,
            sight_uses_agent_radius: true,
        }
    }
}

impl CrowdConfig {
    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = max_agents;
        self
    }

    pub fn with_look_ahead(mut self, distance: f32) -> Self {
        self.look_ahead = distance;
        self
    }

    pub fn with_path_radius(mut self, radius: f32) -> Self {
        self.path_radius = radius;
        self
    }

    pub fn with_accept_radius(mut self, radius: f32) -> Self {
        self.accept_radius = radius;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(Error::InvalidConfig(
                "crowd must allow at least one agent".to_string(),
            ));
        }

        for (name, value) in [
            ("look ahead", self.look_ahead),
            ("path radius", self.path_radius),
            ("accept radius", self.accept_radius),
            ("flow sample radius", self.flow_sample_radius),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        Ok(())
    }
}
