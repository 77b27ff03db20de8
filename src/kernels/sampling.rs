//! Cell-centred grid sampling shared by the host kernels.
//!
//! Cell `i` has its centre at coordinate `i`. Lookups outside the grid clamp
//! to the nearest edge cell.

use std::ops::{Add, Mul, Sub};

use glam::{IVec3, UVec3, Vec3, Vec4};

use crate::constants::numerics::SOLID_THRESHOLD;

/// Value stored per cell.
pub trait Texel:
    Copy + Send + Sync + Add<Output = Self> + Sub<Output = Self> + Mul<f32, Output = Self>
{
    const ZERO: Self;

    fn min_texel(self, other: Self) -> Self;
    fn max_texel(self, other: Self) -> Self;

    /// `a + (b - a) * t`, exact at `t = 0`.
    fn lerp_texel(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl Texel for f32 {
    const ZERO: Self = 0.0;

    fn min_texel(self, other: Self) -> Self {
        self.min(other)
    }

    fn max_texel(self, other: Self) -> Self {
        self.max(other)
    }
}

impl Texel for Vec4 {
    const ZERO: Self = Vec4::ZERO;

    fn min_texel(self, other: Self) -> Self {
        self.min(other)
    }

    fn max_texel(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Read-only view of one grid.
#[derive(Debug, Clone, Copy)]
pub struct GridView<'a, T> {
    data: &'a [T],
    resolution: UVec3,
}

impl<'a, T: Texel> GridView<'a, T> {
    pub fn new(data: &'a [T], resolution: UVec3) -> Self {
        debug_assert_eq!(
            data.len(),
            resolution.x as usize * resolution.y as usize * resolution.z as usize
        );
        Self { data, resolution }
    }

    pub fn clamp_cell(&self, cell: IVec3) -> IVec3 {
        cell.clamp(IVec3::ZERO, self.resolution.as_ivec3() - IVec3::ONE)
    }

    /// Clamp-to-edge cell lookup.
    pub fn fetch(&self, cell: IVec3) -> T {
        let c = self.clamp_cell(cell);
        let r = self.resolution.as_ivec3();
        self.data[(c.x + r.x * (c.y + r.y * c.z)) as usize]
    }

    /// The eight cells surrounding `position`, and the fractional offsets.
    fn corners(&self, position: Vec3) -> ([IVec3; 2], Vec3) {
        let upper = (self.resolution.as_ivec3() - IVec3::ONE).as_vec3();
        let p = position.clamp(Vec3::ZERO, upper);
        let base = p.floor();
        let t = p - base;
        let lo = base.as_ivec3();
        let hi = self.clamp_cell(lo + IVec3::ONE);
        ([lo, hi], t)
    }

    /// Trilinear sample at a cell-space position.
    pub fn sample(&self, position: Vec3) -> T {
        let ([lo, hi], t) = self.corners(position);
        let at = |x: i32, y: i32, z: i32| self.fetch(IVec3::new(x, y, z));

        let c00 = at(lo.x, lo.y, lo.z).lerp_texel(at(hi.x, lo.y, lo.z), t.x);
        let c10 = at(lo.x, hi.y, lo.z).lerp_texel(at(hi.x, hi.y, lo.z), t.x);
        let c01 = at(lo.x, lo.y, hi.z).lerp_texel(at(hi.x, lo.y, hi.z), t.x);
        let c11 = at(lo.x, hi.y, hi.z).lerp_texel(at(hi.x, hi.y, hi.z), t.x);

        let c0 = c00.lerp_texel(c10, t.y);
        let c1 = c01.lerp_texel(c11, t.y);
        c0.lerp_texel(c1, t.z)
    }

    /// Componentwise min and max of the eight corners `sample` blends.
    pub fn corner_bounds(&self, position: Vec3) -> (T, T) {
        let ([lo, hi], _) = self.corners(position);
        let mut min = self.fetch(lo);
        let mut max = min;
        for z in [lo.z, hi.z] {
            for y in [lo.y, hi.y] {
                for x in [lo.x, hi.x] {
                    let value = self.fetch(IVec3::new(x, y, z));
                    min = min.min_texel(value);
                    max = max.max_texel(value);
                }
            }
        }
        (min, max)
    }
}

impl<'a> GridView<'a, f32> {
    pub fn is_solid(&self, cell: IVec3) -> bool {
        self.fetch(cell) > SOLID_THRESHOLD
    }
}

/// Nearest cell to a cell-space position.
pub fn nearest_cell(position: Vec3) -> IVec3 {
    (position + 0.5).floor().as_ivec3()
}

/// Cell coordinate of a linear index, x fastest.
pub fn cell_of(index: usize, resolution: UVec3) -> IVec3 {
    let nx = resolution.x as usize;
    let ny = resolution.y as usize;
    IVec3::new(
        (index % nx) as i32,
        ((index / nx) % ny) as i32,
        (index / (nx * ny)) as i32,
    )
}

/// Velocity-space position of a fluid-space position.
pub fn fluid_to_velocity(position: Vec3, scale: f32) -> Vec3 {
    (position + 0.5) / scale - 0.5
}

/// Fluid-space position of a velocity-space position.
pub fn velocity_to_fluid(position: Vec3, scale: f32) -> Vec3 {
    (position + 0.5) * scale - 0.5
}

/// Velocity cell containing a fluid cell. Fluid cells are never negative.
pub fn velocity_cell_of(fluid_cell: IVec3, scale: i32) -> IVec3 {
    fluid_cell / IVec3::splat(scale)
}
