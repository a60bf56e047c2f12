//! Common utilities and data structures shared by the horde crates
//!
//! Holds the workspace-wide [`Error`] type, the glam vector aliases used
//! throughout, and a handful of 2D/3D geometry helpers needed by the grid,
//! the avoidance solver and the path planner.

mod math;
mod vector;

pub use math::*;
pub use vector::*;

/// Represents a 3D position (Z is up)
pub type Vec3 = glam::Vec3;

/// Represents a position or velocity on the XY plane
pub type Vec2 = glam::Vec2;

/// Error types for the library
///
/// Runtime operations (queries, solves, path searches) never return these;
/// they are raised while building the subsystems and editing crowd state.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("grid error: {0}")]
    Grid(String),

    #[error("pathfinding error: {0}")]
    Pathfinding(String),

    #[error("unknown entity {0}")]
    UnknownEntity(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serialization")]
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for horde operations
pub type Result<T> = std::result::Result<T, Error>;
