use glam::Vec3;

use crate::config::{ConfigError, FireSimulationConfig, ResolutionKey};
use crate::grid::{derive_resolutions, GridInfo, GridSpace};

/// Grid geometry derived from a volume extent and the resolution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationLayout {
    /// Physical size of the simulated volume in world units.
    pub extent: Vec3,
    /// Settings the resolutions were derived from.
    pub key: ResolutionKey,
    pub velocity: GridInfo,
    pub fluid: GridInfo,
    pub fluid_scale: u32,
    /// Velocity cells per world unit along each axis.
    pub world_to_grid: Vec3,
}

impl SimulationLayout {
    pub fn derive(extent: Vec3, config: &FireSimulationConfig) -> Result<Self, ConfigError> {
        let resolutions = derive_resolutions(extent, config)?;
        let key = config.resolution_key();

        Ok(Self {
            extent,
            key,
            velocity: GridInfo::new(resolutions.velocity),
            fluid: GridInfo::new(resolutions.fluid),
            fluid_scale: key.fluid_resolution_scale,
            world_to_grid: resolutions.velocity.as_vec3() / extent,
        })
    }

    pub fn grid(&self, space: GridSpace) -> &GridInfo {
        match space {
            GridSpace::Velocity => &self.velocity,
            GridSpace::Fluid => &self.fluid,
        }
    }

    /// True when both layouts need the same buffers.
    pub fn same_resolutions(&self, other: &SimulationLayout) -> bool {
        self.velocity.resolution == other.velocity.resolution
            && self.fluid.resolution == other.fluid.resolution
    }

    /// World-to-grid scale in xyz and the fluid scale in w.
    pub fn world_to_grid_lane(&self) -> [f32; 4] {
        let w = self.world_to_grid;
        [w.x, w.y, w.z, self.fluid_scale as f32]
    }
}
