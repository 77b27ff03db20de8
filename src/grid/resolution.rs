//! Resolution derivation
//!
//! Turns a physical volume extent into tile-friendly grid resolutions. The
//! dominant axis is snapped and capped first; the other two follow its
//! snapped value so the aspect ratio survives quantisation.

use glam::{UVec3, Vec3};

use crate::config::{validate_extent, ConfigError, FireSimulationConfig};
use crate::constants::resolution::{SNAP_MAX, SNAP_MIN, SNAP_RESOLUTIONS};

/// Grid axis, in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Velocity- and fluid-space resolutions for one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridResolutions {
    pub velocity: UVec3,
    pub fluid: UVec3,
}

/// Axis with the largest raw cell count. Ties go to X, then Y.
pub fn dominant_axis(raw: Vec3) -> Axis {
    if raw.x >= raw.y && raw.x >= raw.z {
        Axis::X
    } else if raw.y >= raw.z {
        Axis::Y
    } else {
        Axis::Z
    }
}

/// Nearest allowed resolution to a raw cell count. Exact ties round up.
pub fn snap_resolution(raw: f32) -> u32 {
    if !(raw > SNAP_MIN as f32) {
        return SNAP_MIN;
    }
    if raw >= SNAP_MAX as f32 {
        return SNAP_MAX;
    }

    let mut best = SNAP_MIN;
    let mut best_distance = f32::INFINITY;
    for candidate in SNAP_RESOLUTIONS {
        let distance = (candidate as f32 - raw).abs();
        if distance <= best_distance {
            best = candidate;
            best_distance = distance;
        }
    }
    best
}

/// Largest allowed resolution not above `max_resolution`.
pub fn cap_resolution(max_resolution: u32) -> u32 {
    SNAP_RESOLUTIONS
        .iter()
        .rev()
        .copied()
        .find(|&candidate| candidate <= max_resolution)
        .unwrap_or(SNAP_MIN)
}

/// Velocity-space resolution for an extent. Callers validate the inputs.
pub fn derive_velocity_resolution(extent: Vec3, cell_size: f32, max_resolution: u32) -> UVec3 {
    let raw = extent / cell_size;
    let axis = dominant_axis(raw);
    let dominant_raw = raw[axis.index()];
    let dominant = snap_resolution(dominant_raw).min(cap_resolution(max_resolution));

    // Aspect ratio is kept relative to the snapped dominant axis.
    let scale = dominant as f32 / dominant_raw;

    let mut resolution = UVec3::splat(SNAP_MIN);
    for index in 0..3 {
        resolution[index] = if index == axis.index() {
            dominant
        } else {
            snap_resolution(raw[index] * scale)
        };
    }
    resolution
}

/// Derive both grid resolutions, rejecting invalid extents and parameters.
pub fn derive_resolutions(
    extent: Vec3,
    config: &FireSimulationConfig,
) -> Result<GridResolutions, ConfigError> {
    config.validate()?;
    validate_extent(extent)?;

    let key = config.resolution_key();
    let velocity = derive_velocity_resolution(extent, key.cell_size, key.max_resolution);
    let fluid = velocity * key.fluid_resolution_scale;

    Ok(GridResolutions { velocity, fluid })
}
