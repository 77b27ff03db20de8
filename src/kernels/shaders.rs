//! Embedded WGSL kernel sources
//!
//! Sources are embedded at compile time. Every kernel is compiled together
//! with `common.wgsl`, which holds the shared indexing and sampling helpers.

use super::KernelId;

/// Shared helpers prepended to every kernel
pub const COMMON_WGSL: &str = include_str!("../shaders/common.wgsl");

pub const CLEAR_FLOAT_WGSL: &str = include_str!("../shaders/clear_float.wgsl");
pub const CLEAR_FLOAT4_WGSL: &str = include_str!("../shaders/clear_float4.wgsl");
pub const PREPARE_FLUID_ADVECTION_WGSL: &str =
    include_str!("../shaders/prepare_fluid_advection.wgsl");
pub const ADVECT_FLUID_WGSL: &str = include_str!("../shaders/advect_fluid.wgsl");
pub const ADVECT_VELOCITY_WGSL: &str = include_str!("../shaders/advect_velocity.wgsl");
pub const BUOYANCY_WGSL: &str = include_str!("../shaders/buoyancy.wgsl");
pub const EXTINGUISH_WGSL: &str = include_str!("../shaders/extinguish.wgsl");
pub const VORTICITY_WGSL: &str = include_str!("../shaders/vorticity.wgsl");
pub const CONFINEMENT_WGSL: &str = include_str!("../shaders/confinement.wgsl");
pub const DIVERGENCE_WGSL: &str = include_str!("../shaders/divergence.wgsl");
pub const PRESSURE_WGSL: &str = include_str!("../shaders/pressure.wgsl");
pub const PROJECTION_WGSL: &str = include_str!("../shaders/projection.wgsl");

impl KernelId {
    /// Kernel body without the shared helpers.
    pub const fn wgsl_body(self) -> &'static str {
        match self {
            KernelId::ClearFloat => CLEAR_FLOAT_WGSL,
            KernelId::ClearFloat4 => CLEAR_FLOAT4_WGSL,
            KernelId::PrepareFluidAdvection => PREPARE_FLUID_ADVECTION_WGSL,
            KernelId::AdvectFluid => ADVECT_FLUID_WGSL,
            KernelId::AdvectVelocity => ADVECT_VELOCITY_WGSL,
            KernelId::Buoyancy => BUOYANCY_WGSL,
            KernelId::Extinguish => EXTINGUISH_WGSL,
            KernelId::Vorticity => VORTICITY_WGSL,
            KernelId::Confinement => CONFINEMENT_WGSL,
            KernelId::Divergence => DIVERGENCE_WGSL,
            KernelId::Pressure => PRESSURE_WGSL,
            KernelId::Projection => PROJECTION_WGSL,
        }
    }

    pub const fn entry_point(self) -> &'static str {
        match self {
            KernelId::ClearFloat => "clear_float_main",
            KernelId::ClearFloat4 => "clear_float4_main",
            KernelId::PrepareFluidAdvection => "prepare_fluid_advection_main",
            KernelId::AdvectFluid => "advect_fluid_main",
            KernelId::AdvectVelocity => "advect_velocity_main",
            KernelId::Buoyancy => "buoyancy_main",
            KernelId::Extinguish => "extinguish_main",
            KernelId::Vorticity => "vorticity_main",
            KernelId::Confinement => "confinement_main",
            KernelId::Divergence => "divergence_main",
            KernelId::Pressure => "pressure_main",
            KernelId::Projection => "projection_main",
        }
    }

    /// Complete WGSL module for this kernel.
    pub fn shader_source(self) -> String {
        format!("{}\n{}", COMMON_WGSL, self.wgsl_body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kernel_has_its_entry_point() {
        for kernel in KernelId::ALL {
            let body = kernel.wgsl_body();
            assert!(
                body.contains(&format!("fn {}(", kernel.entry_point())),
                "{} is missing {}",
                kernel.label(),
                kernel.entry_point()
            );
            assert!(body.contains("@workgroup_size(8, 8, 8)"), "{}", kernel.label());
        }
    }

    #[test]
    fn test_binding_count_matches_signature() {
        for kernel in KernelId::ALL {
            let bindings = kernel.wgsl_body().matches("@binding(").count();
            assert_eq!(bindings, kernel.inputs().len() + 2, "{}", kernel.label());
            assert_eq!(
                kernel.wgsl_body().matches("var<storage, read_write>").count(),
                1,
                "{}",
                kernel.label()
            );
        }
    }

    #[test]
    fn test_storage_element_types_match_formats() {
        for kernel in KernelId::ALL {
            let body = kernel.wgsl_body();
            let output_decl = body
                .lines()
                .find(|line| line.contains("read_write"))
                .unwrap();
            let expected = match kernel.output() {
                crate::backend::GridFormat::R32Float => "array<f32>",
                crate::backend::GridFormat::Rgba32Float => "array<vec4<f32>>",
            };
            assert!(output_decl.contains(expected), "{}", kernel.label());
        }
    }

    #[test]
    fn test_shader_source_includes_common() {
        let source = KernelId::Pressure.shader_source();
        assert!(source.starts_with(COMMON_WGSL));
        assert!(source.contains("fn index_of("));
    }
}
