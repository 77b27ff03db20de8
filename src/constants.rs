// Fire Simulation Constants
//
// Shared between the host-side solver and the WGSL kernels. The kernel tile
// size below must match `@workgroup_size` in every file under `src/shaders/`.

/// Kernel dispatch constants
pub mod dispatch {
    /// Threads per workgroup along each axis (8×8×8 tiles).
    pub const THREAD_GROUP_SIZE: u32 = 8;

    /// Invocations per workgroup, needed when requesting device limits.
    pub const THREADS_PER_GROUP: u32 = THREAD_GROUP_SIZE * THREAD_GROUP_SIZE * THREAD_GROUP_SIZE;

    /// Required alignment of per-dispatch uniform blocks when no device is around to ask.
    pub const UNIFORM_ALIGNMENT: u64 = 256;
}

/// Grid resolution constants
pub mod resolution {
    /// Allowed per-axis resolutions, ascending.
    pub const SNAP_RESOLUTIONS: [u32; 6] = [8, 16, 32, 64, 128, 256];

    pub const SNAP_MIN: u32 = SNAP_RESOLUTIONS[0];
    pub const SNAP_MAX: u32 = SNAP_RESOLUTIONS[SNAP_RESOLUTIONS.len() - 1];
}

/// Numerical constants used by the kernels
pub mod numerics {
    /// Keeps the vorticity gradient normalisation finite in flat regions.
    pub const CONFINEMENT_EPSILON: f32 = 1.0e-5;

    /// Obstacle mask values above this are solid.
    pub const SOLID_THRESHOLD: f32 = 0.0;
}
