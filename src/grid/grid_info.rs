use glam::{UVec3, Vec3};

use crate::constants::dispatch::THREAD_GROUP_SIZE;

/// Which of the two grid spaces a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridSpace {
    Velocity,
    Fluid,
}

/// Metadata shared by every buffer of one grid space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridInfo {
    pub resolution: UVec3,
    /// Largest valid cell coordinate, `resolution - 1`.
    pub bounds: UVec3,
    /// Converts a cell-centre coordinate into normalized `[0, 1]` space.
    pub reciprocal_size: Vec3,
    pub thread_group_count: UVec3,
}

impl GridInfo {
    pub fn new(resolution: UVec3) -> Self {
        debug_assert!(resolution.min_element() > 0, "zero-sized grid axis");

        Self {
            resolution,
            bounds: resolution - UVec3::ONE,
            reciprocal_size: Vec3::ONE / resolution.as_vec3(),
            thread_group_count: thread_group_count(resolution),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize * self.resolution.z as usize
    }

    /// Cell of a linear index, x fastest.
    pub fn cell(&self, index: usize) -> UVec3 {
        let nx = self.resolution.x as usize;
        let ny = self.resolution.y as usize;
        UVec3::new(
            (index % nx) as u32,
            ((index / nx) % ny) as u32,
            (index / (nx * ny)) as u32,
        )
    }
}

/// Workgroups needed to cover `resolution` with 8×8×8 tiles.
pub fn thread_group_count(resolution: UVec3) -> UVec3 {
    (resolution + (THREAD_GROUP_SIZE - 1)) / THREAD_GROUP_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_info_derived_fields() {
        let info = GridInfo::new(UVec3::new(64, 32, 16));

        assert_eq!(info.bounds, UVec3::new(63, 31, 15));
        assert_eq!(info.thread_group_count, UVec3::new(8, 4, 2));
        assert_eq!(info.reciprocal_size, Vec3::new(1.0 / 64.0, 1.0 / 32.0, 1.0 / 16.0));
        assert_eq!(info.cell_count(), 64 * 32 * 16);
    }

    #[test]
    fn test_thread_groups_round_up() {
        assert_eq!(thread_group_count(UVec3::new(9, 8, 1)), UVec3::new(2, 1, 1));
    }

    #[test]
    fn test_cell_is_x_fastest() {
        let info = GridInfo::new(UVec3::new(8, 16, 32));
        assert_eq!(info.cell(0), UVec3::ZERO);
        assert_eq!(info.cell(7), UVec3::new(7, 0, 0));
        assert_eq!(info.cell(8), UVec3::new(0, 1, 0));
        assert_eq!(info.cell(1 + 8 * (2 + 16 * 3)), UVec3::new(1, 2, 3));
        assert_eq!(info.cell(info.cell_count() - 1), info.bounds);
    }
}
