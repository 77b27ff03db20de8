use crate::backend::ComputeBackend;
use crate::grid::{FieldKind, GridSpace};
use crate::kernels::{size_lane, ConfinementParams, KernelParams, StencilParams};

use super::StageContext;

/// Measure the curl of velocity, then push velocity along the confinement
/// force built from it.
pub fn record<B: ComputeBackend + ?Sized>(ctx: &mut StageContext<'_, B>) {
    let size = size_lane(ctx.layout.velocity.resolution);
    let velocity = ctx.current(FieldKind::Velocity);
    let vorticity = ctx.current(FieldKind::Vorticity);

    ctx.dispatch(
        KernelParams::Vorticity(StencilParams { velocity_size: size }),
        GridSpace::Velocity,
        vec![velocity],
        vorticity,
    );

    let params = KernelParams::Confinement(ConfinementParams {
        velocity_size: size,
        strength: [ctx.config.vorticity_strength * ctx.dt, 0.0, 0.0, 0.0],
    });
    let output = ctx.alternate(FieldKind::Velocity);
    ctx.dispatch(params, GridSpace::Velocity, vec![velocity, vorticity], output);
    ctx.swap(FieldKind::Velocity);
}
