//! Host reference backend
//!
//! Evaluates the solver kernels on the CPU so GPU output and numerical
//! properties can be checked against a known-good implementation. It is never
//! selected automatically.

use std::collections::HashMap;

use glam::UVec3;

use super::{BackendError, BufferHandle, ComputeBackend, Dispatch, GridFormat};
use crate::kernels::host::{run_kernel, HostGrid};
use crate::kernels::KernelId;

/// One call observed by the reference backend, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRecord {
    Allocate {
        handle: BufferHandle,
        resolution: UVec3,
        format: GridFormat,
    },
    Release(BufferHandle),
    Dispatch {
        kernel: KernelId,
        reads: Vec<BufferHandle>,
        writes: Vec<BufferHandle>,
    },
    Swap {
        current: BufferHandle,
        alternate: BufferHandle,
    },
    Execute,
    Discard,
}

/// CPU implementation of [`ComputeBackend`].
#[derive(Debug, Default)]
pub struct ReferenceBackend {
    grids: HashMap<BufferHandle, HostGrid>,
    pending: Vec<Dispatch>,
    trace: Vec<CommandRecord>,
    next_id: u64,
    allocations: usize,
    allocation_limit: Option<usize>,
    fail_next_execute: bool,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call since construction or the last `clear_trace`.
    pub fn trace(&self) -> &[CommandRecord] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Dispatch records in the trace, in order.
    pub fn dispatched_kernels(&self) -> Vec<KernelId> {
        self.trace
            .iter()
            .filter_map(|record| match record {
                CommandRecord::Dispatch { kernel, .. } => Some(*kernel),
                _ => None,
            })
            .collect()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn swap_count(&self) -> usize {
        self.trace
            .iter()
            .filter(|record| matches!(record, CommandRecord::Swap { .. }))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every allocation once `limit` grids are live.
    pub fn limit_allocations(&mut self, limit: usize) {
        self.allocation_limit = Some(limit);
    }

    /// Make the next `execute` fail without running anything.
    pub fn fail_next_execute(&mut self) {
        self.fail_next_execute = true;
    }

    fn grid(&self, handle: BufferHandle) -> &HostGrid {
        match self.grids.get(&handle) {
            Some(grid) => grid,
            None => panic!("dispatch references unknown grid buffer {:?}", handle),
        }
    }

    fn check_bindings(&self, dispatch: &Dispatch) {
        let kernel = dispatch.kernel();
        for (slot, (&handle, &format)) in dispatch.reads.iter().zip(kernel.inputs()).enumerate() {
            let bound = self.grid(handle).format();
            assert_eq!(
                bound,
                format,
                "{} input {} bound to a {:?} grid",
                kernel.label(),
                slot,
                bound
            );
        }
        let output = self.grid(dispatch.output()).format();
        assert_eq!(output, kernel.output(), "{} output bound to a {:?} grid", kernel.label(), output);
    }

    fn run(&mut self, dispatch: &Dispatch) {
        let output_handle = dispatch.output();
        let mut output = match self.grids.remove(&output_handle) {
            Some(grid) => grid,
            None => panic!("dispatch writes unknown grid buffer {:?}", output_handle),
        };
        let inputs: Vec<&HostGrid> = dispatch.reads.iter().map(|&h| self.grid(h)).collect();
        run_kernel(&dispatch.params, &inputs, &mut output);
        self.grids.insert(output_handle, output);
    }
}

impl ComputeBackend for ReferenceBackend {
    fn allocate_grid(
        &mut self,
        resolution: UVec3,
        format: GridFormat,
    ) -> Result<BufferHandle, BackendError> {
        if resolution.min_element() == 0 {
            return Err(BackendError::AllocationFailed {
                resolution,
                format,
                message: "zero-sized axis".to_string(),
            });
        }
        if let Some(limit) = self.allocation_limit {
            if self.grids.len() >= limit {
                return Err(BackendError::AllocationFailed {
                    resolution,
                    format,
                    message: format!("allocation limit of {} grids reached", limit),
                });
            }
        }

        self.next_id += 1;
        let handle = BufferHandle::from_raw(self.next_id);
        // Fresh grids hold NaN so reads before a clear are easy to spot.
        self.grids.insert(handle, HostGrid::filled(resolution, format, f32::NAN));
        self.allocations += 1;
        self.trace.push(CommandRecord::Allocate {
            handle,
            resolution,
            format,
        });
        Ok(handle)
    }

    fn release_grid(&mut self, handle: BufferHandle) {
        if self.grids.remove(&handle).is_none() {
            log::warn!("[ReferenceBackend] Release of unknown grid {:?}", handle);
        }
        self.trace.push(CommandRecord::Release(handle));
    }

    fn dispatch(&mut self, dispatch: Dispatch) {
        dispatch.assert_well_formed();
        self.check_bindings(&dispatch);
        log::trace!(
            "[ReferenceBackend] {} groups={:?} reads={:?} writes={:?}",
            dispatch.kernel().label(),
            dispatch.thread_groups,
            dispatch.reads,
            dispatch.writes
        );
        self.trace.push(CommandRecord::Dispatch {
            kernel: dispatch.kernel(),
            reads: dispatch.reads.clone(),
            writes: dispatch.writes.clone(),
        });
        self.pending.push(dispatch);
    }

    fn swap(&mut self, current: BufferHandle, alternate: BufferHandle) {
        self.trace.push(CommandRecord::Swap { current, alternate });
    }

    fn execute(&mut self) -> Result<(), BackendError> {
        let pending = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.fail_next_execute) {
            self.trace.push(CommandRecord::Discard);
            return Err(BackendError::ExecutionFailed(format!(
                "injected failure with {} dispatches pending",
                pending.len()
            )));
        }

        for dispatch in &pending {
            self.run(dispatch);
        }
        self.trace.push(CommandRecord::Execute);
        Ok(())
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.trace.push(CommandRecord::Discard);
    }

    fn read_grid(&mut self, handle: BufferHandle) -> Result<Vec<f32>, BackendError> {
        self.grids
            .get(&handle)
            .map(HostGrid::to_floats)
            .ok_or(BackendError::UnknownBuffer(handle))
    }

    fn write_grid(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), BackendError> {
        self.grids
            .get_mut(&handle)
            .ok_or(BackendError::UnknownBuffer(handle))?
            .write_floats(data)
    }
}
