//! Crowd simulation on top of the horde grid, avoidance and path crates
//!
//! [`Crowd`] is the entry point: build a [`horde_grid::SpatialGrid`] and,
//! optionally, a [`horde_path::FlowField`], hand them to [`Crowd::new`], add
//! agents and obstacles, then call [`Crowd::tick`] once per frame. Ticks are
//! parallelised with rayon.

pub mod agent;
pub mod config;
pub mod crowd;

pub use agent::*;
pub use config::*;
pub use crowd::*;
