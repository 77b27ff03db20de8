//! Grid-based fire and smoke solver
//!
//! Advances a velocity grid and a finer fluid grid (density, temperature,
//! reaction, vapor) once per tick through advection, buoyancy, combustion,
//! vorticity confinement and pressure projection. All grid work is declared
//! to a [`ComputeBackend`]; [`WgpuBackend`] runs it on the GPU and
//! [`ReferenceBackend`] evaluates the same kernels on the host.

pub mod backend;
pub mod config;
pub mod constants;
pub mod grid;
pub mod kernels;
pub mod simulation;

pub use backend::{
    BackendError, BufferHandle, ComputeBackend, Dispatch, GridFormat, ReferenceBackend,
    WgpuBackend,
};
pub use config::{ConfigError, FireSimulationConfig};
pub use grid::{FieldKind, GridInfo, GridSpace};
pub use kernels::KernelId;
pub use simulation::{
    AlwaysReady, FieldView, FieldViews, FireSimulation, SimulationError, SimulationHost,
    SimulationLayout, SimulationState, SimulationWorker, SkipReason, TickOutcome, TickStats,
};
