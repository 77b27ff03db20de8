//! Fire Simulation Pipeline
//!
//! Sequences the solver stages once per tick against a compute backend:
//! advection (fluid, then velocity), buoyancy and combustion, vorticity
//! confinement, then pressure projection.

pub mod advection;
pub mod forces;
pub mod layout;
pub mod orchestrator;
pub mod projection;
pub mod stage;
pub mod stats;
pub mod vorticity;
pub mod worker;

pub use layout::SimulationLayout;
pub use orchestrator::{
    AlwaysReady, FieldView, FieldViews, FireSimulation, SimulationError, SimulationHost,
    SimulationState, SkipReason, TickOutcome,
};
pub use stage::StageContext;
pub use stats::{TickMetrics, TickMonitor, TickStats};
pub use worker::{SimulationCommand, SimulationEvent, SimulationWorker, WorkerError};

#[cfg(test)]
mod tests;
