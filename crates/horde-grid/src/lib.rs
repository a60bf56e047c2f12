//! Uniform 3D spatial hash grid for crowd simulation
//!
//! This crate indexes thousands of moving entities and obstacles so that
//! neighbour queries stay cheap regardless of crowd size.
//!
//! # Features
//!
//! - **Three layers**: agents, dynamic obstacles and static obstacles
//! - **Concurrent insertion**: per-bucket spinlocks behind a [`GridWriter`]
//! - **Queries**: sphere, swept sphere and sector, with ignore lists, tag and
//!   closure filters, bounded top-K selection and occlusion checks
//! - **Polygon obstacles**: index-linked edge rings in an [`ObstacleArena`]
//!
//! # Example
//!
//! ```rust
//! use glam::{UVec3, Vec3};
//! use horde_grid::{EntityRef, GridConfig, GridEntry, Layer, QueryParams, SpatialGrid};
//!
//! let config = GridConfig::from_min_corner(Vec3::ZERO, Vec3::splat(100.0), UVec3::new(10, 10, 1));
//! let mut grid = SpatialGrid::new(config)?;
//! grid.insert(Layer::Agents, GridEntry::new(EntityRef(1), Vec3::new(50.0, 50.0, 50.0), 20.0));
//!
//! let result = grid.query_sphere(Vec3::new(60.0, 50.0, 50.0), 30.0, &QueryParams::default());
//! assert!(result.hit());
//! # Ok::<(), horde_common::Error>(())
//! ```

mod bucket;
pub mod config;
pub mod entry;
pub mod grid;
pub mod obstacle;
pub mod query;

pub use config::*;
pub use entry::*;
pub use grid::*;
pub use obstacle::*;
pub use query::*;

#[cfg(test)]
mod grid_concurrency_tests;
#[cfg(test)]
mod query_exactness_tests;
