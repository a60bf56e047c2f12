//! Configuration for the flow-field grid and the path search over it

use glam::{UVec2, Vec3};
use horde_common::{Error, Result};

/// Largest number of cells a flow field may hold
pub const MAX_FLOW_CELLS: u32 = 1 << 22;

/// Which neighbours a cell connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Connectivity {
    /// Orthogonal moves only
    Four,
    /// Orthogonal and diagonal moves; diagonals are expanded first
    #[default]
    Eight,
}

/// When a diagonal move is refused because of its flanking cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum CornerRule {
    /// Blocked only when both flanking orthogonal cells are impassable
    #[default]
    BlockIfBoth,
    /// Blocked when either flanking orthogonal cell is impassable
    BlockIfAny,
}

/// Flow-field layout and traversal rules
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct FlowFieldConfig {
    /// Minimum corner of the field; cell (0, 0) starts here
    pub origin: Vec3,
    /// Edge length of a square cell
    pub cell_size: f32,
    /// Number of cells along x and y
    pub size: UVec2,
    /// The maximum slope in degrees that is considered walkable
    pub max_walkable_angle: f32,
    pub connectivity: Connectivity,
    pub corner_rule: CornerRule,
}

impl Default for FlowFieldConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            cell_size: 100.0,
            size: UVec2::new(32, 32),
            max_walkable_angle: 45.0,
            connectivity: Connectivity::Eight,
            corner_rule: CornerRule::BlockIfBoth,
        }
    }
}

impl FlowFieldConfig {
    /// Creates a config covering `size` cells of `cell_size` from `origin`
    pub fn new(origin: Vec3, cell_size: f32, size: UVec2) -> Self {
        Self {
            origin,
            cell_size,
            size,
            ..Default::default()
        }
    }

    pub fn with_max_walkable_angle(mut self, degrees: f32) -> Self {
        self.max_walkable_angle = degrees;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_corner_rule(mut self, rule: CornerRule) -> Self {
        self.corner_rule = rule;
        self
    }

    /// Total number of cells
    pub fn cell_count(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.origin.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "flow field origin must be finite, got {}",
                self.origin
            )));
        }

        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "flow field cell size must be positive, got {}",
                self.cell_size
            )));
        }

        if self.size.x == 0 || self.size.y == 0 {
            return Err(Error::InvalidConfig(format!(
                "flow field needs at least one cell, got {}x{}",
                self.size.x, self.size.y
            )));
        }

        if self.cell_count() > MAX_FLOW_CELLS as usize {
            return Err(Error::InvalidConfig(format!(
                "flow field has {} cells, the limit is {}",
                self.cell_count(),
                MAX_FLOW_CELLS
            )));
        }

        if !(0.0..=90.0).contains(&self.max_walkable_angle) {
            return Err(Error::InvalidConfig(format!(
                "max walkable angle must be within [0, 90] degrees, got {}",
                self.max_walkable_angle
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlowFieldConfig::default();
        assert_eq!(config.max_walkable_angle, 45.0);
        assert_eq!(config.connectivity, Connectivity::Eight);
        assert_eq!(config.corner_rule, CornerRule::BlockIfBoth);
        assert_eq!(config.cell_count(), 32 * 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = FlowFieldConfig::new(Vec3::ZERO, 0.0, UVec2::new(4, 4));
        assert!(config.validate().is_err());

        config.cell_size = 1.0;
        config.size = UVec2::new(0, 4);
        assert!(config.validate().is_err());

        config.size = UVec2::new(4, 4);
        assert!(config.validate().is_ok());
        assert!(config.with_max_walkable_angle(120.0).validate().is_err());
    }
}
