//! Solver kernels
//!
//! Every kernel binds its parameter block at binding 0, its inputs at
//! bindings 1..=n in the order returned by [`KernelId::inputs`], and its
//! single output last. Parameter blocks are built only from 16-byte lanes so
//! the Rust and WGSL layouts agree without padding rules.

pub mod host;
pub mod sampling;
pub mod shaders;

use bytemuck::{Pod, Zeroable};

use crate::backend::GridFormat;

use GridFormat::{R32Float, Rgba32Float};

/// The kernels the solver dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    ClearFloat,
    ClearFloat4,
    PrepareFluidAdvection,
    AdvectFluid,
    AdvectVelocity,
    Buoyancy,
    Extinguish,
    Vorticity,
    Confinement,
    Divergence,
    Pressure,
    Projection,
}

impl KernelId {
    pub const ALL: [KernelId; 12] = [
        KernelId::ClearFloat,
        KernelId::ClearFloat4,
        KernelId::PrepareFluidAdvection,
        KernelId::AdvectFluid,
        KernelId::AdvectVelocity,
        KernelId::Buoyancy,
        KernelId::Extinguish,
        KernelId::Vorticity,
        KernelId::Confinement,
        KernelId::Divergence,
        KernelId::Pressure,
        KernelId::Projection,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            KernelId::ClearFloat => "ClearFloat",
            KernelId::ClearFloat4 => "ClearFloat4",
            KernelId::PrepareFluidAdvection => "PrepareFluidAdvection",
            KernelId::AdvectFluid => "AdvectFluid",
            KernelId::AdvectVelocity => "AdvectVelocity",
            KernelId::Buoyancy => "Buoyancy",
            KernelId::Extinguish => "Extinguish",
            KernelId::Vorticity => "Vorticity",
            KernelId::Confinement => "Confinement",
            KernelId::Divergence => "Divergence",
            KernelId::Pressure => "Pressure",
            KernelId::Projection => "Projection",
        }
    }

    /// Input formats in binding order.
    pub const fn inputs(self) -> &'static [GridFormat] {
        match self {
            KernelId::ClearFloat | KernelId::ClearFloat4 => &[],
            // velocity, phi, obstacles
            KernelId::PrepareFluidAdvection => &[Rgba32Float, Rgba32Float, R32Float],
            // velocity, fluid, phi0, phi1, obstacles
            KernelId::AdvectFluid => &[Rgba32Float, Rgba32Float, Rgba32Float, Rgba32Float, R32Float],
            // velocity, obstacles
            KernelId::AdvectVelocity => &[Rgba32Float, R32Float],
            // velocity, fluid, obstacles
            KernelId::Buoyancy => &[Rgba32Float, Rgba32Float, R32Float],
            // fluid, obstacles
            KernelId::Extinguish => &[Rgba32Float, R32Float],
            // velocity
            KernelId::Vorticity => &[Rgba32Float],
            // velocity, vorticity
            KernelId::Confinement => &[Rgba32Float, Rgba32Float],
            // velocity, obstacles
            KernelId::Divergence => &[Rgba32Float, R32Float],
            // pressure, divergence, obstacles
            KernelId::Pressure => &[R32Float, R32Float, R32Float],
            // velocity, pressure, obstacles
            KernelId::Projection => &[Rgba32Float, R32Float, R32Float],
        }
    }

    pub const fn output(self) -> GridFormat {
        match self {
            KernelId::ClearFloat | KernelId::Divergence | KernelId::Pressure => R32Float,
            _ => Rgba32Float,
        }
    }

    pub const fn clear_for(format: GridFormat) -> KernelId {
        match format {
            R32Float => KernelId::ClearFloat,
            Rgba32Float => KernelId::ClearFloat4,
        }
    }
}

/// Grid size lane shared by all parameter blocks. `w` is unused.
pub fn size_lane(resolution: glam::UVec3) -> [u32; 4] {
    [resolution.x, resolution.y, resolution.z, 0]
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ClearParams {
    pub size: [u32; 4],
}

/// Forward or backward trace used by the MacCormack preparation passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PrepareAdvectionParams {
    pub velocity_size: [u32; 4],
    pub fluid_size: [u32; 4],
    /// xyz: velocity cells per world unit, w: fluid resolution scale.
    pub world_to_grid: [f32; 4],
    /// x: signed time step of the trace.
    pub step: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AdvectFluidParams {
    pub velocity_size: [u32; 4],
    pub fluid_size: [u32; 4],
    pub world_to_grid: [f32; 4],
    /// x: time step.
    pub step: [f32; 4],
    pub dissipation: [f32; 4],
    pub decay: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AdvectVelocityParams {
    pub velocity_size: [u32; 4],
    pub world_to_grid: [f32; 4],
    pub step: [f32; 4],
    pub dissipation: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BuoyancyParams {
    pub velocity_size: [u32; 4],
    pub fluid_size: [u32; 4],
    /// xyz: up direction, w: fluid resolution scale.
    pub up: [f32; 4],
    /// x: buoyancy·dt, y: weight·dt, z: ambient temperature.
    pub forces: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExtinguishParams {
    pub velocity_size: [u32; 4],
    pub fluid_size: [u32; 4],
    /// x: reaction amount·dt, y: dt, z: fluid resolution scale.
    pub reaction: [f32; 4],
    /// x: vapor cooling, y: vapor extinguish, z: reaction extinguish.
    pub extinguishment: [f32; 4],
    pub temperature_distribution: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StencilParams {
    pub velocity_size: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ConfinementParams {
    pub velocity_size: [u32; 4],
    /// x: vorticity strength·dt.
    pub strength: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PressureParams {
    pub velocity_size: [u32; 4],
    /// x: 1/dt, zero when dt is zero.
    pub solve: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProjectionParams {
    pub velocity_size: [u32; 4],
    /// x: dt.
    pub solve: [f32; 4],
}

/// Parameter block of one dispatch; the variant decides the kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelParams {
    ClearFloat(ClearParams),
    ClearFloat4(ClearParams),
    PrepareFluidAdvection(PrepareAdvectionParams),
    AdvectFluid(AdvectFluidParams),
    AdvectVelocity(AdvectVelocityParams),
    Buoyancy(BuoyancyParams),
    Extinguish(ExtinguishParams),
    Vorticity(StencilParams),
    Confinement(ConfinementParams),
    Divergence(StencilParams),
    Pressure(PressureParams),
    Projection(ProjectionParams),
}

impl KernelParams {
    pub fn clear(format: GridFormat, resolution: glam::UVec3) -> Self {
        let params = ClearParams {
            size: size_lane(resolution),
        };
        match format {
            R32Float => KernelParams::ClearFloat(params),
            Rgba32Float => KernelParams::ClearFloat4(params),
        }
    }

    pub fn kernel(&self) -> KernelId {
        match self {
            KernelParams::ClearFloat(_) => KernelId::ClearFloat,
            KernelParams::ClearFloat4(_) => KernelId::ClearFloat4,
            KernelParams::PrepareFluidAdvection(_) => KernelId::PrepareFluidAdvection,
            KernelParams::AdvectFluid(_) => KernelId::AdvectFluid,
            KernelParams::AdvectVelocity(_) => KernelId::AdvectVelocity,
            KernelParams::Buoyancy(_) => KernelId::Buoyancy,
            KernelParams::Extinguish(_) => KernelId::Extinguish,
            KernelParams::Vorticity(_) => KernelId::Vorticity,
            KernelParams::Confinement(_) => KernelId::Confinement,
            KernelParams::Divergence(_) => KernelId::Divergence,
            KernelParams::Pressure(_) => KernelId::Pressure,
            KernelParams::Projection(_) => KernelId::Projection,
        }
    }

    /// Uniform bytes as the WGSL `Params` struct expects them.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KernelParams::ClearFloat(p) | KernelParams::ClearFloat4(p) => bytemuck::bytes_of(p),
            KernelParams::PrepareFluidAdvection(p) => bytemuck::bytes_of(p),
            KernelParams::AdvectFluid(p) => bytemuck::bytes_of(p),
            KernelParams::AdvectVelocity(p) => bytemuck::bytes_of(p),
            KernelParams::Buoyancy(p) => bytemuck::bytes_of(p),
            KernelParams::Extinguish(p) => bytemuck::bytes_of(p),
            KernelParams::Vorticity(p) | KernelParams::Divergence(p) => bytemuck::bytes_of(p),
            KernelParams::Confinement(p) => bytemuck::bytes_of(p),
            KernelParams::Pressure(p) => bytemuck::bytes_of(p),
            KernelParams::Projection(p) => bytemuck::bytes_of(p),
        }
    }
}

/// Size of the largest parameter block, used for uniform slot strides.
pub fn max_params_size() -> usize {
    KernelId::ALL
        .iter()
        .map(|kernel| kernel.params_size())
        .max()
        .unwrap_or(0)
}

impl KernelId {
    /// Byte size of this kernel's parameter block.
    pub const fn params_size(self) -> usize {
        use std::mem::size_of;
        match self {
            KernelId::ClearFloat | KernelId::ClearFloat4 => size_of::<ClearParams>(),
            KernelId::PrepareFluidAdvection => size_of::<PrepareAdvectionParams>(),
            KernelId::AdvectFluid => size_of::<AdvectFluidParams>(),
            KernelId::AdvectVelocity => size_of::<AdvectVelocityParams>(),
            KernelId::Buoyancy => size_of::<BuoyancyParams>(),
            KernelId::Extinguish => size_of::<ExtinguishParams>(),
            KernelId::Vorticity | KernelId::Divergence => size_of::<StencilParams>(),
            KernelId::Confinement => size_of::<ConfinementParams>(),
            KernelId::Pressure => size_of::<PressureParams>(),
            KernelId::Projection => size_of::<ProjectionParams>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_blocks_are_lane_aligned() {
        assert_eq!(std::mem::size_of::<ClearParams>(), 16);
        assert_eq!(std::mem::size_of::<AdvectFluidParams>(), 96);
        assert_eq!(std::mem::size_of::<ExtinguishParams>(), 80);
        assert_eq!(max_params_size(), 96);
        assert_eq!(max_params_size() % 16, 0);
    }

    #[test]
    fn test_params_select_kernel() {
        let clear = KernelParams::clear(GridFormat::R32Float, glam::UVec3::splat(8));
        assert_eq!(clear.kernel(), KernelId::ClearFloat);
        assert_eq!(clear.as_bytes().len(), 16);
        assert_eq!(clear.as_bytes().len(), KernelId::ClearFloat.params_size());

        let clear4 = KernelParams::clear(GridFormat::Rgba32Float, glam::UVec3::splat(8));
        assert_eq!(clear4.kernel(), KernelId::clear_for(GridFormat::Rgba32Float));
    }

    #[test]
    fn test_kernel_signatures() {
        for kernel in KernelId::ALL {
            // Storage bindings plus the uniform must fit the default limit of 8.
            assert!(kernel.inputs().len() + 1 <= 8, "{}", kernel.label());
        }
        assert_eq!(KernelId::AdvectFluid.inputs().len(), 5);
        assert_eq!(KernelId::Pressure.output(), GridFormat::R32Float);
        assert_eq!(KernelId::Projection.output(), GridFormat::Rgba32Float);
    }
}
