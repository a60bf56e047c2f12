//! Crowd agents and their parameters

use glam::{Vec2, Vec3};
use horde_avoidance::{AvoidanceConfig, Avoiding};
use horde_common::{Error, Result};
use horde_grid::{EntityRef, GridEntry, TagMask};

/// Movement state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// No goal
    #[default]
    Idle,
    /// Heading straight for a visible goal
    Direct,
    /// Following an A* path
    Pathing,
    /// Following the flow field
    Flowing,
    /// Within the accept radius of the goal
    Arrived,
    /// No way to the goal was found this tick
    Stuck,
}

/// Per-agent parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct AgentParams {
    /// Radius of the agent
    pub radius: f32,
    /// Maximum speed of the agent
    pub max_speed: f32,
    /// Speed gained per second, 0 for no limit
    pub acceleration: f32,
    /// Speed lost per second, 0 for no limit
    pub deceleration: f32,
    /// Capability tags visible to query filters
    pub tags: TagMask,
    /// Run the avoidance solve for this agent
    pub avoid: bool,
    pub avoidance: AvoidanceConfig,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: 40.0,
            max_speed: 300.0,
            acceleration: 0.0,
            deceleration: 0.0,
            tags: TagMask::NONE,
            avoid: true,
            avoidance: AvoidanceConfig::default(),
        }
    }
}

impl AgentParams {
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_max_speed(mut self, speed: f32) -> Self {
        self.max_speed = speed;
        self
    }

    /// Limits how fast the agent speeds up and slows down
    pub fn with_acceleration(mut self, acceleration: f32, deceleration: f32) -> Self {
        self.acceleration = acceleration;
        self.deceleration = deceleration;
        self
    }

    pub fn with_tags(mut self, tags: TagMask) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_avoidance(mut self, avoidance: AvoidanceConfig) -> Self {
        self.avoidance = avoidance;
        self
    }

    /// Validates the parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.radius > 0.0 && self.radius.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "agent radius must be positive, got {}",
                self.radius
            )));
        }
        if !self.max_speed.is_finite() || self.max_speed < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "agent max speed must be non-negative, got {}",
                self.max_speed
            )));
        }
        for (name, rate) in [
            ("acceleration", self.acceleration),
            ("deceleration", self.deceleration),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "agent {} must be non-negative, got {}",
                    name, rate
                )));
            }
        }
        self.avoidance.validate()
    }
}

/// An agent in the crowd
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    pub entity: EntityRef,
    pub params: AgentParams,
    pub position: Vec3,
    /// Velocity applied during the last tick
    pub velocity: Vec2,
    /// Velocity requested by steering during the last tick
    pub desired: Vec2,
    pub goal: Option<Vec3>,
    /// Waypoints of the current A* path, empty when not pathing
    pub path: Vec<Vec3>,
    pub state: AgentState,
    /// Dying agents only avoid each other
    pub dying: bool,
}

impl CrowdAgent {
    pub fn new(entity: EntityRef, position: Vec3, params: AgentParams) -> Self {
        Self {
            entity,
            params,
            position,
            velocity: Vec2::ZERO,
            desired: Vec2::ZERO,
            goal: None,
            path: Vec::new(),
            state: AgentState::Idle,
            dying: false,
        }
    }

    /// Grid entry for this tick
    pub fn grid_entry(&self) -> GridEntry {
        GridEntry::new(self.entity, self.position, self.params.radius).with_tags(self.params.tags)
    }

    /// Avoidance input for this tick
    pub fn avoiding(&self) -> Avoiding {
        Avoiding {
            entity: self.entity,
            position: self.position,
            velocity: self.velocity,
            desired: self.desired,
            radius: self.params.radius,
            acceleration: self.params.acceleration,
            deceleration: self.params.deceleration,
            dying: self.dying,
            config: self.params.avoidance,
        }
    }
}
