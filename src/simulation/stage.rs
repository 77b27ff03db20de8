use crate::backend::{BufferHandle, ComputeBackend, Dispatch};
use crate::config::FireSimulationConfig;
use crate::grid::{FieldKind, GridBufferSet, GridSpace};
use crate::kernels::KernelParams;

use super::layout::SimulationLayout;

/// Recording state shared by the stages of one tick.
///
/// Stages only see buffer handles through this context. Every dispatch is
/// validated before it reaches the backend, and every swap goes through the
/// buffer set so the next stage binds the buffer that was just written.
pub struct StageContext<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    grids: &'a mut GridBufferSet,
    pub layout: &'a SimulationLayout,
    pub config: &'a FireSimulationConfig,
    pub dt: f32,
    dispatches: usize,
}

impl<'a, B: ComputeBackend + ?Sized> StageContext<'a, B> {
    pub fn new(
        backend: &'a mut B,
        grids: &'a mut GridBufferSet,
        layout: &'a SimulationLayout,
        config: &'a FireSimulationConfig,
        dt: f32,
    ) -> Self {
        Self {
            backend,
            grids,
            layout,
            config,
            dt,
            dispatches: 0,
        }
    }

    /// Record one kernel over every cell of `space`.
    pub fn dispatch(
        &mut self,
        params: KernelParams,
        space: GridSpace,
        reads: Vec<BufferHandle>,
        output: BufferHandle,
    ) {
        let thread_groups = self.layout.grid(space).thread_group_count;
        let dispatch = Dispatch::new(params, thread_groups, reads, output);
        dispatch.assert_well_formed();

        log::trace!(
            "[FireSimulation] {} reads={:?} writes={:?}",
            dispatch.kernel().label(),
            dispatch.reads,
            dispatch.writes
        );
        self.backend.dispatch(dispatch);
        self.dispatches += 1;
    }

    pub fn swap(&mut self, kind: FieldKind) {
        self.grids.swap(&mut *self.backend, kind);
    }

    pub fn current(&self, kind: FieldKind) -> BufferHandle {
        self.grids.current(kind)
    }

    /// The write target of a double-buffered field.
    pub fn alternate(&self, kind: FieldKind) -> BufferHandle {
        match self.grids.double_buffer(kind) {
            Some(pair) => pair.alternate,
            None => panic!("{} has no alternate buffer", kind.label()),
        }
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches
    }
}
