//! Compute backend contract
//!
//! The solver never touches memory directly. It allocates grids, declares
//! kernel dispatches with their read and write sets, and asks the backend to
//! execute the recorded graph once per tick.

pub mod reference;
pub mod wgpu_backend;

pub use reference::{CommandRecord, ReferenceBackend};
pub use wgpu_backend::{request_headless_device, WgpuBackend};

use glam::UVec3;

use crate::kernels::{KernelId, KernelParams};

/// Opaque identity of one grid buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Texel layout of a grid buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridFormat {
    /// One f32 per cell (pressure, divergence, obstacles).
    R32Float,
    /// Four f32 per cell (velocity, fluid data, vorticity).
    Rgba32Float,
}

impl GridFormat {
    pub const fn channels(self) -> usize {
        match self {
            GridFormat::R32Float => 1,
            GridFormat::Rgba32Float => 4,
        }
    }

    pub const fn texel_size(self) -> u64 {
        self.channels() as u64 * std::mem::size_of::<f32>() as u64
    }
}

/// One kernel invocation over a grid.
///
/// `reads` are bound in the kernel's declared input order; `writes` holds the
/// single output buffer.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub params: KernelParams,
    pub thread_groups: UVec3,
    pub reads: Vec<BufferHandle>,
    pub writes: Vec<BufferHandle>,
}

impl Dispatch {
    pub fn new(
        params: KernelParams,
        thread_groups: UVec3,
        reads: Vec<BufferHandle>,
        output: BufferHandle,
    ) -> Self {
        Self {
            params,
            thread_groups,
            reads,
            writes: vec![output],
        }
    }

    pub fn kernel(&self) -> KernelId {
        self.params.kernel()
    }

    pub fn output(&self) -> BufferHandle {
        self.writes[0]
    }

    /// Panics when the declaration is malformed. A bad declaration means the
    /// stage wiring is broken, which no caller can recover from.
    pub fn assert_well_formed(&self) {
        let kernel = self.kernel();
        assert_eq!(
            self.reads.len(),
            kernel.inputs().len(),
            "{} declares {} inputs, expected {}",
            kernel.label(),
            self.reads.len(),
            kernel.inputs().len()
        );
        assert_eq!(self.writes.len(), 1, "{} must write exactly one buffer", kernel.label());
        assert!(
            !self.reads.contains(&self.writes[0]),
            "{} reads and writes {:?} in the same dispatch",
            kernel.label(),
            self.writes[0]
        );
        assert!(
            self.thread_groups.min_element() > 0,
            "{} dispatched with an empty thread group count",
            kernel.label()
        );
    }
}

/// Declarative allocate/dispatch/swap interface the solver drives.
pub trait ComputeBackend {
    /// Allocate a grid. Contents are undefined until cleared or written.
    fn allocate_grid(
        &mut self,
        resolution: UVec3,
        format: GridFormat,
    ) -> Result<BufferHandle, BackendError>;

    fn release_grid(&mut self, handle: BufferHandle);

    /// Record a dispatch. Dispatches execute in recording order.
    fn dispatch(&mut self, dispatch: Dispatch);

    /// Two handles exchanged roles. No data moves.
    fn swap(&mut self, _current: BufferHandle, _alternate: BufferHandle) {}

    /// Execute everything recorded since the last execute or discard.
    fn execute(&mut self) -> Result<(), BackendError>;

    /// Drop recorded dispatches without running them.
    fn discard(&mut self);

    /// Copy a grid back to the host, channels interleaved.
    fn read_grid(&mut self, handle: BufferHandle) -> Result<Vec<f32>, BackendError>;

    /// Overwrite a grid from the host.
    fn write_grid(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), BackendError>;
}

/// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Grid allocation failed for {resolution:?} {format:?}: {message}")]
    AllocationFailed {
        resolution: UVec3,
        format: GridFormat,
        message: String,
    },

    #[error("Unknown grid buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("Grid data size mismatch: expected {expected} floats, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Grid readback failed: {0}")]
    ReadbackFailed(String),

    #[error("No compatible GPU adapter found")]
    NoAdapter,

    #[error("GPU device request failed: {0}")]
    DeviceRequest(String),

    #[error("Kernel pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Compute graph execution failed: {0}")]
    ExecutionFailed(String),
}
