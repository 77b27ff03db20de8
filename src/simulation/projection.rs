//! Pressure projection
//!
//! Divergence, `iterations` Jacobi sweeps, then subtraction of the pressure
//! gradient. Pressure persists between ticks and warm-starts the next solve.

use crate::backend::{ComputeBackend, GridFormat};
use crate::grid::{FieldKind, GridSpace};
use crate::kernels::{size_lane, KernelParams, PressureParams, ProjectionParams, StencilParams};

use super::StageContext;

pub fn record<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>, iterations: u32) {
    let size = size_lane(ctx.layout.velocity.resolution);
    let dt = ctx.dt;
    let velocity = ctx.current(FieldKind::Velocity);
    let obstacles = ctx.current(FieldKind::Obstacles);
    let divergence = ctx.current(FieldKind::Divergence);

    ctx.dispatch(
        KernelParams::Divergence(StencilParams { velocity_size: size }),
        GridSpace::Velocity,
        vec![velocity, obstacles],
        divergence,
    );

    if iterations == 0 {
        // No solve: pressure is zero, so projection leaves velocity alone.
        let pressure = ctx.current(FieldKind::Pressure);
        ctx.dispatch(
            KernelParams::clear(GridFormat::R32Float, ctx.layout.velocity.resolution),
            GridSpace::Velocity,
            Vec::new(),
            pressure,
        );
    }

    let rcp_dt = if dt > 0.0 { dt.recip() } else { 0.0 };
    for _ in 0..iterations {
        let params = KernelParams::Pressure(PressureParams {
            velocity_size: size,
            solve: [rcp_dt, 0.0, 0.0, 0.0],
        });
        let reads = vec![ctx.current(FieldKind::Pressure), divergence, obstacles];
        let output = ctx.alternate(FieldKind::Pressure);
        ctx.dispatch(params, GridSpace::Velocity, reads, output);
        ctx.swap(FieldKind::Pressure);
    }

    let params = KernelParams::Projection(ProjectionParams {
        velocity_size: size,
        solve: [dt, 0.0, 0.0, 0.0],
    });
    let reads = vec![velocity, ctx.current(FieldKind::Pressure), obstacles];
    let output = ctx.alternate(FieldKind::Velocity);
    ctx.dispatch(params, GridSpace::Velocity, reads, output);
    ctx.swap(FieldKind::Velocity);
}
