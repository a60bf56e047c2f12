//! Reciprocal collision avoidance for crowd agents
//!
//! Built on ORCA half-planes solved by incremental linear programming.
//! [`AvoidancePipeline`] runs the per-agent two-phase solve against a
//! [`horde_grid::SpatialGrid`]: first against neighbouring agents, then
//! against disc obstacles and polygon edges.

pub mod avoiding;
pub mod config;
pub mod orca;

pub use avoiding::*;
pub use config::*;
pub use orca::*;
