//! Host evaluation of the solver kernels.
//!
//! Each function mirrors the WGSL kernel of the same name cell for cell and
//! runs across cells with rayon.

use glam::{IVec3, UVec3, Vec3, Vec4};
use rayon::prelude::*;

use crate::backend::{BackendError, GridFormat};
use crate::constants::numerics::CONFINEMENT_EPSILON;

use super::sampling::{
    cell_of, fluid_to_velocity, nearest_cell, velocity_cell_of, velocity_to_fluid, GridView,
};
use super::{
    AdvectFluidParams, AdvectVelocityParams, BuoyancyParams, ConfinementParams, ExtinguishParams,
    KernelParams, PrepareAdvectionParams, PressureParams, ProjectionParams, StencilParams,
};

const X: IVec3 = IVec3::X;
const Y: IVec3 = IVec3::Y;
const Z: IVec3 = IVec3::Z;

/// A grid held in host memory.
#[derive(Debug, Clone, PartialEq)]
pub enum HostGrid {
    Scalar { resolution: UVec3, data: Vec<f32> },
    Vector { resolution: UVec3, data: Vec<Vec4> },
}

impl HostGrid {
    /// A grid filled with `fill` in every channel.
    pub fn filled(resolution: UVec3, format: GridFormat, fill: f32) -> Self {
        let cells = resolution.x as usize * resolution.y as usize * resolution.z as usize;
        match format {
            GridFormat::R32Float => HostGrid::Scalar {
                resolution,
                data: vec![fill; cells],
            },
            GridFormat::Rgba32Float => HostGrid::Vector {
                resolution,
                data: vec![Vec4::splat(fill); cells],
            },
        }
    }

    pub fn format(&self) -> GridFormat {
        match self {
            HostGrid::Scalar { .. } => GridFormat::R32Float,
            HostGrid::Vector { .. } => GridFormat::Rgba32Float,
        }
    }

    pub fn float_count(&self) -> usize {
        match self {
            HostGrid::Scalar { data, .. } => data.len(),
            HostGrid::Vector { data, .. } => data.len() * 4,
        }
    }

    /// Channels interleaved, as a GPU readback would return them.
    pub fn to_floats(&self) -> Vec<f32> {
        match self {
            HostGrid::Scalar { data, .. } => data.clone(),
            HostGrid::Vector { data, .. } => data.iter().flat_map(|v| v.to_array()).collect(),
        }
    }

    pub fn write_floats(&mut self, floats: &[f32]) -> Result<(), BackendError> {
        let expected = self.float_count();
        if floats.len() != expected {
            return Err(BackendError::SizeMismatch {
                expected,
                actual: floats.len(),
            });
        }
        match self {
            HostGrid::Scalar { data, .. } => data.copy_from_slice(floats),
            HostGrid::Vector { data, .. } => {
                for (texel, chunk) in data.iter_mut().zip(floats.chunks_exact(4)) {
                    *texel = Vec4::from_slice(chunk);
                }
            }
        }
        Ok(())
    }

    pub fn scalar(&self) -> GridView<'_, f32> {
        match self {
            HostGrid::Scalar { resolution, data } => GridView::new(data, *resolution),
            HostGrid::Vector { .. } => panic!("expected a scalar grid, found a vector grid"),
        }
    }

    pub fn vector(&self) -> GridView<'_, Vec4> {
        match self {
            HostGrid::Vector { resolution, data } => GridView::new(data, *resolution),
            HostGrid::Scalar { .. } => panic!("expected a vector grid, found a scalar grid"),
        }
    }

    fn scalar_mut(&mut self) -> (UVec3, &mut [f32]) {
        match self {
            HostGrid::Scalar { resolution, data } => (*resolution, data),
            HostGrid::Vector { .. } => panic!("expected a scalar output grid"),
        }
    }

    fn vector_mut(&mut self) -> (UVec3, &mut [Vec4]) {
        match self {
            HostGrid::Vector { resolution, data } => (*resolution, data),
            HostGrid::Scalar { .. } => panic!("expected a vector output grid"),
        }
    }
}

/// Run one kernel. `inputs` follow the kernel's binding order.
pub fn run_kernel(params: &KernelParams, inputs: &[&HostGrid], output: &mut HostGrid) {
    let kernel = params.kernel();
    assert_eq!(
        inputs.len(),
        kernel.inputs().len(),
        "{} bound with the wrong number of inputs",
        kernel.label()
    );

    match params {
        KernelParams::ClearFloat(_) | KernelParams::ClearFloat4(_) => clear(output),
        KernelParams::PrepareFluidAdvection(p) => {
            prepare_fluid_advection(p, inputs[0], inputs[1], inputs[2], output)
        }
        KernelParams::AdvectFluid(p) => advect_fluid(p, inputs, output),
        KernelParams::AdvectVelocity(p) => advect_velocity(p, inputs[0], inputs[1], output),
        KernelParams::Buoyancy(p) => buoyancy(p, inputs[0], inputs[1], inputs[2], output),
        KernelParams::Extinguish(p) => extinguish(p, inputs[0], inputs[1], output),
        KernelParams::Vorticity(p) => vorticity(p, inputs[0], output),
        KernelParams::Confinement(p) => confinement(p, inputs[0], inputs[1], output),
        KernelParams::Divergence(p) => divergence(p, inputs[0], inputs[1], output),
        KernelParams::Pressure(p) => pressure(p, inputs[0], inputs[1], inputs[2], output),
        KernelParams::Projection(p) => projection(p, inputs[0], inputs[1], inputs[2], output),
    }
}

fn grid_size(lane: [u32; 4]) -> UVec3 {
    UVec3::new(lane[0], lane[1], lane[2])
}

fn lane3(lane: [f32; 4]) -> Vec3 {
    Vec3::new(lane[0], lane[1], lane[2])
}

fn for_each_cell<T: Send>(
    resolution: UVec3,
    expected: UVec3,
    out: &mut [T],
    f: impl Fn(IVec3) -> T + Send + Sync,
) {
    assert_eq!(resolution, expected, "output grid does not match the dispatch size");
    out.par_iter_mut()
        .enumerate()
        .for_each(|(index, texel)| *texel = f(cell_of(index, resolution)));
}

fn clear(output: &mut HostGrid) {
    match output {
        HostGrid::Scalar { data, .. } => data.fill(0.0),
        HostGrid::Vector { data, .. } => data.fill(Vec4::ZERO),
    }
}

/// Backward-traced fluid-space position of `cell` after `step` seconds.
fn trace_fluid(
    cell: IVec3,
    velocity: &GridView<'_, Vec4>,
    world_to_grid: [f32; 4],
    step: f32,
) -> Vec3 {
    let scale = world_to_grid[3];
    let position = cell.as_vec3();
    let v = velocity.sample(fluid_to_velocity(position, scale)).truncate();
    position - v * (lane3(world_to_grid) * scale * step)
}

fn prepare_fluid_advection(
    p: &PrepareAdvectionParams,
    velocity: &HostGrid,
    phi: &HostGrid,
    obstacles: &HostGrid,
    output: &mut HostGrid,
) {
    let velocity = velocity.vector();
    let phi = phi.vector();
    let obstacles = obstacles.scalar();
    let scale = p.world_to_grid[3] as i32;
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.fluid_size), out, |cell| {
        let traced = trace_fluid(cell, &velocity, p.world_to_grid, p.step[0]);
        let source = velocity_cell_of(phi.clamp_cell(nearest_cell(traced)), scale);
        if obstacles.is_solid(source) {
            phi.fetch(cell)
        } else {
            phi.sample(traced)
        }
    });
}

fn advect_fluid(p: &AdvectFluidParams, inputs: &[&HostGrid], output: &mut HostGrid) {
    let velocity = inputs[0].vector();
    let fluid = inputs[1].vector();
    let phi0 = inputs[2].vector();
    let phi1 = inputs[3].vector();
    let obstacles = inputs[4].scalar();
    let scale = p.world_to_grid[3] as i32;
    let dt = p.step[0];
    let dissipation = Vec4::ONE + Vec4::from_array(p.dissipation) * dt;
    let decay = Vec4::from_array(p.decay.map(|rate| (-rate * dt).exp()));
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.fluid_size), out, |cell| {
        if obstacles.is_solid(velocity_cell_of(cell, scale)) {
            return Vec4::ZERO;
        }

        let traced = trace_fluid(cell, &velocity, p.world_to_grid, dt);
        let source = velocity_cell_of(fluid.clamp_cell(nearest_cell(traced)), scale);
        let own = fluid.fetch(cell);
        let value = if obstacles.is_solid(source) {
            own
        } else {
            let corrected = phi1.fetch(cell) + (own - phi0.fetch(cell)) * 0.5;
            let (lo, hi) = fluid.corner_bounds(traced);
            corrected.max(lo).min(hi)
        };
        value / dissipation * decay
    });
}

fn advect_velocity(
    p: &AdvectVelocityParams,
    velocity: &HostGrid,
    obstacles: &HostGrid,
    output: &mut HostGrid,
) {
    let velocity = velocity.vector();
    let obstacles = obstacles.scalar();
    let dt = p.step[0];
    let displacement = lane3(p.world_to_grid) * dt;
    let dissipation = Vec3::ONE + lane3(p.dissipation) * dt;
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        if obstacles.is_solid(cell) {
            return Vec4::ZERO;
        }
        let traced = cell.as_vec3() - velocity.fetch(cell).truncate() * displacement;
        if obstacles.is_solid(nearest_cell(traced)) {
            return Vec4::ZERO;
        }
        let sampled = velocity.sample(traced);
        (sampled.truncate() / dissipation).extend(sampled.w)
    });
}

fn buoyancy(
    p: &BuoyancyParams,
    velocity: &HostGrid,
    fluid: &HostGrid,
    obstacles: &HostGrid,
    output: &mut HostGrid,
) {
    let velocity = velocity.vector();
    let fluid = fluid.vector();
    let obstacles = obstacles.scalar();
    let up = lane3(p.up);
    let scale = p.up[3];
    let [buoyancy_dt, weight_dt, ambient, _] = p.forces;
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        if obstacles.is_solid(cell) {
            return Vec4::ZERO;
        }
        let v = velocity.fetch(cell);
        let sample = fluid.sample(velocity_to_fluid(cell.as_vec3(), scale));
        let (density, temperature) = (sample.x, sample.y);
        if temperature > ambient {
            let force = buoyancy_dt * (temperature - ambient) - weight_dt * density;
            v + (up * force).extend(0.0)
        } else {
            v
        }
    });
}

fn extinguish(p: &ExtinguishParams, fluid: &HostGrid, obstacles: &HostGrid, output: &mut HostGrid) {
    let fluid = fluid.vector();
    let obstacles = obstacles.scalar();
    let [amount_dt, dt, scale, _] = p.reaction;
    let [vapor_cooling, vapor_extinguish, reaction_extinguish, _] = p.extinguishment;
    let distribution = lane3(p.temperature_distribution);
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.fluid_size), out, |cell| {
        if obstacles.is_solid(velocity_cell_of(cell, scale as i32)) {
            return Vec4::ZERO;
        }
        let [density, temperature, reaction, vapor] = fluid.fetch(cell).to_array();

        let burn = reaction.max(0.0).min(amount_dt);
        let reaction_next = reaction
            - burn
            - dt * (reaction_extinguish * reaction + vapor_extinguish * vapor);
        let temperature_next = temperature + burn * distribution.x - dt * vapor_cooling * vapor;

        Vec4::new(
            density + burn * distribution.y,
            temperature_next.max(temperature.min(0.0)),
            reaction_next.max(reaction.min(0.0)),
            vapor + burn * distribution.z,
        )
    });
}

fn vorticity(p: &StencilParams, velocity: &HostGrid, output: &mut HostGrid) {
    let velocity = velocity.vector();
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        let v = |offset: IVec3| velocity.fetch(cell + offset);
        let (l, r) = (v(-X), v(X));
        let (d, u) = (v(-Y), v(Y));
        let (b, f) = (v(-Z), v(Z));

        let curl = Vec3::new(
            (u.z - d.z) - (f.y - b.y),
            (f.x - b.x) - (r.z - l.z),
            (r.y - l.y) - (u.x - d.x),
        ) * 0.5;
        curl.extend(curl.length())
    });
}

fn confinement(
    p: &ConfinementParams,
    velocity: &HostGrid,
    vorticity: &HostGrid,
    output: &mut HostGrid,
) {
    let velocity = velocity.vector();
    let vorticity = vorticity.vector();
    let strength_dt = p.strength[0];
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        let magnitude = |offset: IVec3| vorticity.fetch(cell + offset).w;
        let eta = Vec3::new(
            magnitude(X) - magnitude(-X),
            magnitude(Y) - magnitude(-Y),
            magnitude(Z) - magnitude(-Z),
        ) * 0.5;
        let normal = eta / (eta.length() + CONFINEMENT_EPSILON);
        let omega = vorticity.fetch(cell).truncate();
        velocity.fetch(cell) + (normal.cross(omega) * strength_dt).extend(0.0)
    });
}

fn divergence(p: &StencilParams, velocity: &HostGrid, obstacles: &HostGrid, output: &mut HostGrid) {
    let velocity = velocity.vector();
    let obstacles = obstacles.scalar();
    let (resolution, out) = output.scalar_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        if obstacles.is_solid(cell) {
            return 0.0;
        }
        let v = |offset: IVec3| {
            let neighbour = cell + offset;
            if obstacles.is_solid(neighbour) {
                Vec3::ZERO
            } else {
                velocity.fetch(neighbour).truncate()
            }
        };
        0.5 * ((v(X).x - v(-X).x) + (v(Y).y - v(-Y).y) + (v(Z).z - v(-Z).z))
    });
}

/// Pressure of a neighbour, with solid neighbours mirroring the centre.
fn neighbour_pressure(
    pressure: &GridView<'_, f32>,
    obstacles: &GridView<'_, f32>,
    cell: IVec3,
    offset: IVec3,
    centre: f32,
) -> f32 {
    let neighbour = cell + offset;
    if obstacles.is_solid(neighbour) {
        centre
    } else {
        pressure.fetch(neighbour)
    }
}

fn pressure(
    p: &PressureParams,
    pressure: &HostGrid,
    divergence: &HostGrid,
    obstacles: &HostGrid,
    output: &mut HostGrid,
) {
    let pressure = pressure.scalar();
    let divergence = divergence.scalar();
    let obstacles = obstacles.scalar();
    let rcp_dt = p.solve[0];
    let (resolution, out) = output.scalar_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        if obstacles.is_solid(cell) {
            return 0.0;
        }
        let centre = pressure.fetch(cell);
        let sum: f32 = [X, -X, Y, -Y, Z, -Z]
            .into_iter()
            .map(|offset| neighbour_pressure(&pressure, &obstacles, cell, offset, centre))
            .sum();
        (sum - divergence.fetch(cell) * rcp_dt) / 6.0
    });
}

fn projection(
    p: &ProjectionParams,
    velocity: &HostGrid,
    pressure: &HostGrid,
    obstacles: &HostGrid,
    output: &mut HostGrid,
) {
    let velocity = velocity.vector();
    let pressure = pressure.scalar();
    let obstacles = obstacles.scalar();
    let dt = p.solve[0];
    let (resolution, out) = output.vector_mut();

    for_each_cell(resolution, grid_size(p.velocity_size), out, |cell| {
        if obstacles.is_solid(cell) {
            return Vec4::ZERO;
        }
        let centre = pressure.fetch(cell);
        let p = |offset: IVec3| neighbour_pressure(&pressure, &obstacles, cell, offset, centre);
        let gradient = Vec3::new(p(X) - p(-X), p(Y) - p(-Y), p(Z) - p(-Z)) * 0.5;
        let v = velocity.fetch(cell);
        (v.truncate() - gradient * dt).extend(v.w)
    });
}
