//! Buoyancy and combustion
//!
//! Every coefficient that integrates over time is premultiplied by `dt` on
//! the host, so a zero time step leaves both fields untouched.

use crate::backend::ComputeBackend;
use crate::grid::{FieldKind, GridSpace};
use crate::kernels::{size_lane, BuoyancyParams, ExtinguishParams, KernelParams};

use super::StageContext;

pub fn record<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>) {
    apply_buoyancy(ctx);
    extinguish(ctx);
}

pub fn apply_buoyancy<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>) {
    let layout = ctx.layout;
    let config = ctx.config;
    let dt = ctx.dt;
    let up = config.up.normalize_or_zero();

    let params = KernelParams::Buoyancy(BuoyancyParams {
        velocity_size: size_lane(layout.velocity.resolution),
        fluid_size: size_lane(layout.fluid.resolution),
        up: [up.x, up.y, up.z, layout.fluid_scale as f32],
        forces: [
            config.buoyancy * dt,
            config.density_weight * dt,
            config.ambient_temperature,
            0.0,
        ],
    });

    let reads = vec![
        ctx.current(FieldKind::Velocity),
        ctx.current(FieldKind::Fluid),
        ctx.current(FieldKind::Obstacles),
    ];
    let output = ctx.alternate(FieldKind::Velocity);
    ctx.dispatch(params, GridSpace::Velocity, reads, output);
    ctx.swap(FieldKind::Velocity);
}

pub fn extinguish<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>) {
    let layout = ctx.layout;
    let config = ctx.config;
    let dt = ctx.dt;

    let params = KernelParams::Extinguish(ExtinguishParams {
        velocity_size: size_lane(layout.velocity.resolution),
        fluid_size: size_lane(layout.fluid.resolution),
        reaction: [config.reaction_amount * dt, dt, layout.fluid_scale as f32, 0.0],
        extinguishment: [
            config.vapor_cooling,
            config.vapor_extinguish,
            config.reaction_extinguish,
            0.0,
        ],
        temperature_distribution: config.temperature_distribution.extend(0.0).to_array(),
    });

    let reads = vec![ctx.current(FieldKind::Fluid), ctx.current(FieldKind::Obstacles)];
    let output = ctx.alternate(FieldKind::Fluid);
    ctx.dispatch(params, GridSpace::Fluid, reads, output);
    ctx.swap(FieldKind::Fluid);
}
