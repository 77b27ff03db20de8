//! Grid spaces, resolutions and buffer ownership

pub mod arena;
pub mod buffer_set;
pub mod grid_info;
pub mod resolution;

pub use arena::{GridArena, GridKey};
pub use buffer_set::{DoubleBuffer, FieldKind, GridBufferSet};
pub use grid_info::{thread_group_count, GridInfo, GridSpace};
pub use resolution::{derive_resolutions, derive_velocity_resolution, Axis, GridResolutions};
