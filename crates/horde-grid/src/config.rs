//! Grid configuration

use glam::{UVec3, Vec3};
use horde_common::{Error, Result};

/// Upper bound on buckets per layer; anything larger is almost certainly a
/// unit mix-up in the cell size.
pub const MAX_BUCKETS_PER_LAYER: u64 = 1 << 24;

/// Configuration for a [`SpatialGrid`](crate::SpatialGrid)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct GridConfig {
    /// World position the grid volume is centred on
    pub center: Vec3,
    /// Size of one cell along each axis
    pub cell_size: Vec3,
    /// Number of cells along each axis
    pub grid_size: UVec3,
    /// Entries reserved per bucket up front
    pub bucket_capacity: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            cell_size: Vec3::splat(300.0),
            grid_size: UVec3::new(20, 20, 1),
            bucket_capacity: 8,
        }
    }
}

impl GridConfig {
    /// Creates a configuration centred on `center`
    pub fn new(center: Vec3, cell_size: Vec3, grid_size: UVec3) -> Self {
        Self {
            center,
            cell_size,
            grid_size,
            ..Default::default()
        }
    }

    /// Creates a configuration whose minimum corner sits at `min`
    pub fn from_min_corner(min: Vec3, cell_size: Vec3, grid_size: UVec3) -> Self {
        let center = min + cell_size * grid_size.as_vec3() * 0.5;
        Self::new(center, cell_size, grid_size)
    }

    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = center;
        self
    }

    pub fn with_cell_size(mut self, cell_size: Vec3) -> Self {
        self.cell_size = cell_size;
        self
    }

    pub fn with_grid_size(mut self, grid_size: UVec3) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn with_bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    /// Minimum corner of the covered volume
    pub fn min_corner(&self) -> Vec3 {
        self.center - self.extent() * 0.5
    }

    /// Full size of the covered volume
    pub fn extent(&self) -> Vec3 {
        self.cell_size * self.grid_size.as_vec3()
    }

    /// Number of buckets in one layer
    pub fn bucket_count(&self) -> usize {
        self.grid_size.x as usize * self.grid_size.y as usize * self.grid_size.z as usize
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(Error::InvalidConfig(
                "grid center must be finite".to_string(),
            ));
        }

        if !self.cell_size.is_finite() || self.cell_size.min_element() <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "cell size must be positive on every axis, got {}",
                self.cell_size
            )));
        }

        if self.grid_size.min_element() == 0 {
            return Err(Error::InvalidConfig(format!(
                "grid size must be at least one cell on every axis, got {}",
                self.grid_size
            )));
        }

        let total = (self.grid_size.x as u64)
            .checked_mul(self.grid_size.y as u64)
            .and_then(|xy| xy.checked_mul(self.grid_size.z as u64))
            .filter(|&total| total <= MAX_BUCKETS_PER_LAYER);
        if total.is_none() {
            return Err(Error::InvalidConfig(format!(
                "grid of {} cells exceeds the limit of {} buckets per layer",
                self.grid_size, MAX_BUCKETS_PER_LAYER
            )));
        }

        if self.grid_size.max_element() > i32::MAX as u32 / 4 {
            return Err(Error::InvalidConfig(
                "grid size exceeds the addressable coordinate range".to_string(),
            ));
        }

        Ok(())
    }
}
