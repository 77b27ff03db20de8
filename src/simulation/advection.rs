//! Advection stage
//!
//! Fluid data is transported with a MacCormack pair of traces; velocity with
//! a single semi-Lagrangian trace. Fluid advection reads the velocity field
//! before velocity advection replaces it.

use crate::backend::{BufferHandle, ComputeBackend};
use crate::grid::{FieldKind, GridSpace};
use crate::kernels::{
    size_lane, AdvectFluidParams, AdvectVelocityParams, KernelParams, PrepareAdvectionParams,
};

use super::StageContext;

/// Intermediate fluid-space grids of the MacCormack scheme.
#[derive(Debug, Clone, Copy)]
pub struct AdvectionScratch {
    /// Backward trace of `phi1`.
    pub phi0: BufferHandle,
    /// Forward semi-Lagrangian result.
    pub phi1: BufferHandle,
}

pub fn record<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>, scratch: AdvectionScratch) {
    advect_fluid(ctx, scratch);
    advect_velocity(ctx);
}

pub fn advect_fluid<B: ComputeBackend + ?Sized>(
    ctx: &mut StageContext<'_, B>,
    scratch: AdvectionScratch,
) {
    let layout = ctx.layout;
    let dt = ctx.dt;
    let prepare = |step: f32| {
        KernelParams::PrepareFluidAdvection(PrepareAdvectionParams {
            velocity_size: size_lane(layout.velocity.resolution),
            fluid_size: size_lane(layout.fluid.resolution),
            world_to_grid: layout.world_to_grid_lane(),
            step: [step, 0.0, 0.0, 0.0],
        })
    };

    let velocity = ctx.current(FieldKind::Velocity);
    let fluid = ctx.current(FieldKind::Fluid);
    let obstacles = ctx.current(FieldKind::Obstacles);
    let AdvectionScratch { phi0, phi1 } = scratch;

    ctx.dispatch(prepare(dt), GridSpace::Fluid, vec![velocity, fluid, obstacles], phi1);
    ctx.dispatch(prepare(-dt), GridSpace::Fluid, vec![velocity, phi1, obstacles], phi0);

    let config = ctx.config;
    let params = KernelParams::AdvectFluid(AdvectFluidParams {
        velocity_size: size_lane(layout.velocity.resolution),
        fluid_size: size_lane(layout.fluid.resolution),
        world_to_grid: layout.world_to_grid_lane(),
        step: [dt, 0.0, 0.0, 0.0],
        dissipation: config.fluid_dissipation.to_array(),
        decay: config.fluid_decay.to_array(),
    });
    let output = ctx.alternate(FieldKind::Fluid);
    ctx.dispatch(
        params,
        GridSpace::Fluid,
        vec![velocity, fluid, phi0, phi1, obstacles],
        output,
    );
    ctx.swap(FieldKind::Fluid);
}

pub fn advect_velocity<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>) {
    let layout = ctx.layout;
    let params = KernelParams::AdvectVelocity(AdvectVelocityParams {
        velocity_size: size_lane(layout.velocity.resolution),
        world_to_grid: layout.world_to_grid_lane(),
        step: [ctx.dt, 0.0, 0.0, 0.0],
        dissipation: ctx.config.dissipation.extend(0.0).to_array(),
    });

    let reads = vec![ctx.current(FieldKind::Velocity), ctx.current(FieldKind::Obstacles)];
    let output = ctx.alternate(FieldKind::Velocity);
    ctx.dispatch(params, GridSpace::Velocity, reads, output);
    ctx.swap(FieldKind::Velocity);
}
