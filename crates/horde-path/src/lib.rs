//! Flow-field grid, A* search and path following
//!
//! The [`FlowField`] holds one cell per grid square with a traversal cost
//! and ground height. It serves two consumers:
//!
//! - [`PathSearch`] runs a slope-aware A* between two world locations and
//!   returns cell-centre waypoints ending at the exact goal.
//! - [`FlowField::integrate`] spreads costs out from goal cells so agents
//!   without an explicit path can follow the downhill direction.
//!
//! [`steer_along_path`] turns a waypoint list into a steering direction.
//!
//! # Example
//!
//! ```rust
//! use glam::{UVec2, Vec3};
//! use horde_path::{FlowField, FlowFieldConfig};
//!
//! let field = FlowField::new(FlowFieldConfig::new(Vec3::ZERO, 1.0, UVec2::new(5, 5)))?;
//! let path = field.find_path(Vec3::new(0.5, 0.5, 0.0), Vec3::new(4.5, 4.5, 0.0));
//! assert_eq!(path.map(|p| p.len()), Some(6));
//! # Ok::<(), horde_common::Error>(())
//! ```

pub mod astar;
pub mod config;
pub mod field;
pub mod steering;

pub use astar::*;
pub use config::*;
pub use field::*;
pub use steering::*;
