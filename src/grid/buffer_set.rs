//! Grid Buffer Set
//!
//! Owns the handles of every persistent field. Double-buffered fields keep a
//! `current` and an `alternate` handle; a stage writes the alternate and the
//! swap makes it current without moving any data.

use crate::backend::{BackendError, BufferHandle, ComputeBackend, GridFormat};

use super::arena::{GridArena, GridKey};
use super::grid_info::{GridInfo, GridSpace};

/// Ping-pong pair of buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleBuffer {
    pub current: BufferHandle,
    pub alternate: BufferHandle,
}

impl DoubleBuffer {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.alternate);
    }
}

/// Persistent fields of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Velocity,
    Fluid,
    Pressure,
    Divergence,
    Vorticity,
    Obstacles,
}

impl FieldKind {
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Velocity,
        FieldKind::Fluid,
        FieldKind::Pressure,
        FieldKind::Divergence,
        FieldKind::Vorticity,
        FieldKind::Obstacles,
    ];

    pub const fn space(self) -> GridSpace {
        match self {
            FieldKind::Fluid => GridSpace::Fluid,
            _ => GridSpace::Velocity,
        }
    }

    pub const fn format(self) -> GridFormat {
        match self {
            FieldKind::Pressure | FieldKind::Divergence | FieldKind::Obstacles => {
                GridFormat::R32Float
            }
            FieldKind::Velocity | FieldKind::Fluid | FieldKind::Vorticity => {
                GridFormat::Rgba32Float
            }
        }
    }

    pub const fn is_double_buffered(self) -> bool {
        matches!(self, FieldKind::Velocity | FieldKind::Fluid | FieldKind::Pressure)
    }

    pub const fn label(self) -> &'static str {
        match self {
            FieldKind::Velocity => "velocity",
            FieldKind::Fluid => "fluid",
            FieldKind::Pressure => "pressure",
            FieldKind::Divergence => "divergence",
            FieldKind::Vorticity => "vorticity",
            FieldKind::Obstacles => "obstacles",
        }
    }
}

/// Handles and metadata of all persistent grids.
///
/// Cheap to clone: a tick records its stages against a copy and only
/// commits it once the backend has executed the recorded work.
#[derive(Debug, Clone, PartialEq)]
pub struct GridBufferSet {
    pub velocity_grid: GridInfo,
    pub fluid_grid: GridInfo,
    pub velocity: DoubleBuffer,
    pub fluid: DoubleBuffer,
    pub pressure: DoubleBuffer,
    pub obstacles: BufferHandle,
    pub vorticity: BufferHandle,
    pub divergence: BufferHandle,
}

impl GridBufferSet {
    /// Acquire every persistent grid from the arena. On failure the buffers
    /// acquired so far go back to the pool. Contents are undefined until the
    /// caller clears them.
    pub fn allocate<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        arena: &mut GridArena,
        velocity_grid: GridInfo,
        fluid_grid: GridInfo,
    ) -> Result<Self, BackendError> {
        let mut acquired = Vec::with_capacity(9);
        let result = Self::acquire_all(backend, arena, velocity_grid, fluid_grid, &mut acquired);

        if result.is_err() {
            for handle in acquired {
                arena.recycle(handle);
            }
        }
        result
    }

    fn acquire_all<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        arena: &mut GridArena,
        velocity_grid: GridInfo,
        fluid_grid: GridInfo,
        acquired: &mut Vec<BufferHandle>,
    ) -> Result<Self, BackendError> {
        let mut acquire = |kind: FieldKind| -> Result<BufferHandle, BackendError> {
            let resolution = match kind.space() {
                GridSpace::Velocity => velocity_grid.resolution,
                GridSpace::Fluid => fluid_grid.resolution,
            };
            let handle = arena.acquire(backend, GridKey::new(resolution, kind.format()))?;
            acquired.push(handle);
            Ok(handle)
        };

        Ok(Self {
            velocity_grid,
            fluid_grid,
            velocity: DoubleBuffer {
                current: acquire(FieldKind::Velocity)?,
                alternate: acquire(FieldKind::Velocity)?,
            },
            fluid: DoubleBuffer {
                current: acquire(FieldKind::Fluid)?,
                alternate: acquire(FieldKind::Fluid)?,
            },
            pressure: DoubleBuffer {
                current: acquire(FieldKind::Pressure)?,
                alternate: acquire(FieldKind::Pressure)?,
            },
            obstacles: acquire(FieldKind::Obstacles)?,
            vorticity: acquire(FieldKind::Vorticity)?,
            divergence: acquire(FieldKind::Divergence)?,
        })
    }

    pub fn grid(&self, space: GridSpace) -> &GridInfo {
        match space {
            GridSpace::Velocity => &self.velocity_grid,
            GridSpace::Fluid => &self.fluid_grid,
        }
    }

    pub fn field_grid(&self, kind: FieldKind) -> &GridInfo {
        self.grid(kind.space())
    }

    /// Handle a reader of `kind` should bind right now.
    pub fn current(&self, kind: FieldKind) -> BufferHandle {
        match kind {
            FieldKind::Velocity => self.velocity.current,
            FieldKind::Fluid => self.fluid.current,
            FieldKind::Pressure => self.pressure.current,
            FieldKind::Divergence => self.divergence,
            FieldKind::Vorticity => self.vorticity,
            FieldKind::Obstacles => self.obstacles,
        }
    }

    pub fn double_buffer(&self, kind: FieldKind) -> Option<DoubleBuffer> {
        match kind {
            FieldKind::Velocity => Some(self.velocity),
            FieldKind::Fluid => Some(self.fluid),
            FieldKind::Pressure => Some(self.pressure),
            _ => None,
        }
    }

    /// Make the alternate buffer of `kind` current and tell the backend.
    pub fn swap<B: ComputeBackend + ?Sized>(&mut self, backend: &mut B, kind: FieldKind) {
        let pair = match kind {
            FieldKind::Velocity => &mut self.velocity,
            FieldKind::Fluid => &mut self.fluid,
            FieldKind::Pressure => &mut self.pressure,
            _ => panic!("{} is not double-buffered", kind.label()),
        };
        pair.swap();
        backend.swap(pair.current, pair.alternate);
    }

    /// Every handle with its field, both halves of each pair included.
    pub fn all_handles(&self) -> Vec<(FieldKind, BufferHandle)> {
        let mut handles = Vec::with_capacity(9);
        for kind in FieldKind::ALL {
            match self.double_buffer(kind) {
                Some(pair) => {
                    handles.push((kind, pair.current));
                    handles.push((kind, pair.alternate));
                }
                None => handles.push((kind, self.current(kind))),
            }
        }
        handles
    }
}
