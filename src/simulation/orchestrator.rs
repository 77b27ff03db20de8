//! Pipeline orchestrator
//!
//! Owns the backend, the grid arena and the persistent buffer set, and turns
//! each tick into allocation, a full clear, or one physics step. A tick either
//! commits completely or leaves every field as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use glam::Vec3;

use crate::backend::{BackendError, BufferHandle, ComputeBackend, Dispatch, GridFormat};
use crate::config::{validate_extent, ConfigError, FireSimulationConfig};
use crate::grid::{FieldKind, GridArena, GridBufferSet, GridInfo, GridKey};
use crate::kernels::KernelParams;

use super::advection::{self, AdvectionScratch};
use super::layout::SimulationLayout;
use super::stage::StageContext;
use super::stats::{TickMonitor, TickStats};
use super::{forces, projection, vorticity};

/// Lifecycle of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    /// No extent has been given yet.
    Uninitialized,
    /// Layout is known; the next tick allocates and clears every grid.
    AwaitingAllocation,
    /// Grids are live and ticks step the physics.
    Ready,
    /// A reset was requested; the next tick clears every grid.
    Clearing,
}

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotInitialized,
    HostNotReady,
    InvalidConfig,
    BackendFailure,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Grids were allocated and cleared. No physics ran.
    Allocated,
    /// Every grid was cleared after a reset request. No physics ran.
    Cleared,
    Stepped(TickStats),
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TickOutcome::Skipped(_))
    }
}

/// Readiness of whatever owns the solver.
pub trait SimulationHost {
    fn is_ready(&self) -> bool;
}

/// Host that is always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl SimulationHost for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

impl SimulationHost for AtomicBool {
    fn is_ready(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Read-only handle to one field as a renderer binds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldView {
    pub handle: BufferHandle,
    pub grid: GridInfo,
    pub format: GridFormat,
}

/// The fields a renderer samples after a physics tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldViews {
    pub velocity: FieldView,
    pub fluid: FieldView,
    pub pressure: FieldView,
}

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulation grids are not allocated")]
    NotAllocated,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Grid-based fire and smoke solver driven one tick at a time.
pub struct FireSimulation<B: ComputeBackend> {
    backend: B,
    arena: GridArena,
    state: SimulationState,
    layout: Option<SimulationLayout>,
    grids: Option<GridBufferSet>,
    stepped_since_clear: bool,
    monitor: TickMonitor,
}

impl<B: ComputeBackend> FireSimulation<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            arena: GridArena::new(),
            state: SimulationState::Uninitialized,
            layout: None,
            grids: None,
            stepped_since_clear: false,
            monitor: TickMonitor::new(),
        }
    }

    /// Derive grid resolutions for a volume. Allocation happens on the next
    /// tick. Calling again with settings that give the same layout keeps the
    /// current grids and their contents.
    pub fn initialize(
        &mut self,
        extent: Vec3,
        config: &FireSimulationConfig,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        validate_extent(extent)?;
        let layout = SimulationLayout::derive(extent, config)?;

        if let Some(current) = &self.layout {
            if *current == layout {
                log::debug!("[FireSimulation] Initialize with unchanged layout");
                return Ok(());
            }
            if current.same_resolutions(&layout) {
                log::info!(
                    "[FireSimulation] Extent changed to {:?}, resolutions unchanged",
                    extent
                );
                self.layout = Some(layout);
                return Ok(());
            }
        }

        log::info!(
            "[FireSimulation] Initialized: extent {:?}, velocity {:?}, fluid {:?}",
            extent,
            layout.velocity.resolution,
            layout.fluid.resolution
        );
        self.release_grids();
        self.layout = Some(layout);
        self.state = SimulationState::AwaitingAllocation;
        Ok(())
    }

    pub fn tick(&mut self, dt: f32, config: &FireSimulationConfig) -> TickOutcome {
        self.tick_with_host(&AlwaysReady, dt, config)
    }

    /// Advance one tick if `host` is ready.
    pub fn tick_with_host<H: SimulationHost + ?Sized>(
        &mut self,
        host: &H,
        dt: f32,
        config: &FireSimulationConfig,
    ) -> TickOutcome {
        if !host.is_ready() {
            log::debug!("[FireSimulation] Host not ready, skipping tick");
            return self.skip(SkipReason::HostNotReady);
        }
        let Some(layout) = self.layout.clone() else {
            return self.skip(SkipReason::NotInitialized);
        };
        if let Err(err) = config.validate() {
            log::warn!("[FireSimulation] Rejected tick config: {}", err);
            return self.skip(SkipReason::InvalidConfig);
        }
        if !(dt.is_finite() && dt >= 0.0) {
            log::warn!("[FireSimulation] Rejected time step {}", dt);
            return self.skip(SkipReason::InvalidConfig);
        }

        if config.resolution_key() != layout.key {
            match SimulationLayout::derive(layout.extent, config) {
                Ok(derived) => {
                    if !derived.same_resolutions(&layout) {
                        log::info!(
                            "[FireSimulation] Resolution changed: velocity {:?} -> {:?}",
                            layout.velocity.resolution,
                            derived.velocity.resolution
                        );
                        self.release_grids();
                        self.state = SimulationState::AwaitingAllocation;
                    }
                    self.layout = Some(derived);
                }
                Err(err) => {
                    log::warn!("[FireSimulation] Rejected resolution settings: {}", err);
                    return self.skip(SkipReason::InvalidConfig);
                }
            }
        }

        match self.state {
            SimulationState::Uninitialized => self.skip(SkipReason::NotInitialized),
            SimulationState::AwaitingAllocation => self.allocate_and_clear(),
            SimulationState::Clearing => self.clear(),
            SimulationState::Ready => self.step(dt, config),
        }
    }

    /// Clear every grid on the next tick instead of stepping.
    pub fn request_reset(&mut self) {
        match self.state {
            SimulationState::Ready => {
                log::info!("[FireSimulation] Reset requested");
                self.state = SimulationState::Clearing;
            }
            SimulationState::Uninitialized => {
                log::debug!("[FireSimulation] Reset ignored, not initialized");
            }
            SimulationState::AwaitingAllocation | SimulationState::Clearing => {}
        }
    }

    /// Release every grid and forget the layout.
    pub fn deinitialize(&mut self) {
        self.backend.discard();
        self.release_grids();
        self.layout = None;
        self.state = SimulationState::Uninitialized;
        log::info!("[FireSimulation] Deinitialized");
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn layout(&self) -> Option<&SimulationLayout> {
        self.layout.as_ref()
    }

    pub fn buffer_set(&self) -> Option<&GridBufferSet> {
        self.grids.as_ref()
    }

    /// Current velocity, fluid and pressure buffers. `None` until a physics
    /// tick has run since the grids were last allocated or cleared.
    pub fn field_views(&self) -> Option<FieldViews> {
        if !self.stepped_since_clear {
            return None;
        }
        let grids = self.grids.as_ref()?;
        let view = |kind: FieldKind| FieldView {
            handle: grids.current(kind),
            grid: *grids.field_grid(kind),
            format: kind.format(),
        };

        Some(FieldViews {
            velocity: view(FieldKind::Velocity),
            fluid: view(FieldKind::Fluid),
            pressure: view(FieldKind::Pressure),
        })
    }

    /// Copy the current buffer of a field back to the host.
    pub fn read_field(&mut self, kind: FieldKind) -> Result<Vec<f32>, SimulationError> {
        let handle = self.current_handle(kind)?;
        Ok(self.backend.read_grid(handle)?)
    }

    /// Overwrite the current buffer of a field, e.g. to place obstacles or
    /// emit fuel. A pending clear still wipes it.
    pub fn write_field(&mut self, kind: FieldKind, data: &[f32]) -> Result<(), SimulationError> {
        let handle = self.current_handle(kind)?;
        self.backend.write_grid(handle, data)?;
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn monitor(&self) -> &TickMonitor {
        &self.monitor
    }

    fn current_handle(&self, kind: FieldKind) -> Result<BufferHandle, SimulationError> {
        self.grids
            .as_ref()
            .map(|grids| grids.current(kind))
            .ok_or(SimulationError::NotAllocated)
    }

    fn skip(&mut self, reason: SkipReason) -> TickOutcome {
        self.monitor.record_skip();
        TickOutcome::Skipped(reason)
    }

    fn release_grids(&mut self) {
        self.grids = None;
        self.stepped_since_clear = false;
        self.arena.release_all(&mut self.backend);
    }

    fn allocate_and_clear(&mut self) -> TickOutcome {
        let Some((velocity, fluid)) = self.layout.as_ref().map(|l| (l.velocity, l.fluid)) else {
            return self.skip(SkipReason::NotInitialized);
        };

        if self.grids.is_none() {
            match GridBufferSet::allocate(&mut self.backend, &mut self.arena, velocity, fluid) {
                Ok(grids) => self.grids = Some(grids),
                Err(err) => {
                    log::error!("[FireSimulation] Grid allocation failed: {}", err);
                    return self.skip(SkipReason::BackendFailure);
                }
            }
            log::info!(
                "[FireSimulation] Allocated grids: velocity {:?}, fluid {:?}",
                velocity.resolution,
                fluid.resolution
            );
        }

        match self.clear_all() {
            Ok(()) => TickOutcome::Allocated,
            Err(reason) => {
                // Allocated but not cleared; the next tick retries the clear.
                self.state = SimulationState::Clearing;
                self.skip(reason)
            }
        }
    }

    fn clear(&mut self) -> TickOutcome {
        if self.grids.is_none() {
            self.state = SimulationState::AwaitingAllocation;
            return self.allocate_and_clear();
        }
        match self.clear_all() {
            Ok(()) => {
                log::info!("[FireSimulation] Cleared all grids");
                TickOutcome::Cleared
            }
            Err(reason) => self.skip(reason),
        }
    }

    /// Zero both halves of every field and execute. Obstacles clear to the
    /// open mask, which is also zero.
    fn clear_all(&mut self) -> Result<(), SkipReason> {
        let Some(grids) = self.grids.as_ref() else {
            return Err(SkipReason::NotInitialized);
        };

        for (kind, handle) in grids.all_handles() {
            let grid = grids.field_grid(kind);
            let params = KernelParams::clear(kind.format(), grid.resolution);
            let dispatch = Dispatch::new(params, grid.thread_group_count, Vec::new(), handle);
            dispatch.assert_well_formed();
            self.backend.dispatch(dispatch);
        }

        if let Err(err) = self.backend.execute() {
            log::error!("[FireSimulation] Clear failed: {}", err);
            self.backend.discard();
            return Err(SkipReason::BackendFailure);
        }

        self.stepped_since_clear = false;
        self.state = SimulationState::Ready;
        Ok(())
    }

    fn step(&mut self, dt: f32, config: &FireSimulationConfig) -> TickOutcome {
        let started = Instant::now();
        let (Some(layout), Some(committed)) = (self.layout.clone(), self.grids.clone()) else {
            log::warn!("[FireSimulation] Grids missing, degrading to allocation");
            self.state = SimulationState::AwaitingAllocation;
            return self.allocate_and_clear();
        };

        let scratch_key = GridKey::new(layout.fluid.resolution, GridFormat::Rgba32Float);
        let phi1 = match self.arena.acquire(&mut self.backend, scratch_key) {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("[FireSimulation] Advection scratch allocation failed: {}", err);
                return self.skip(SkipReason::BackendFailure);
            }
        };
        let phi0 = match self.arena.acquire(&mut self.backend, scratch_key) {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("[FireSimulation] Advection scratch allocation failed: {}", err);
                self.arena.recycle(phi1);
                return self.skip(SkipReason::BackendFailure);
            }
        };

        let iterations = config.pressure_iterations();
        let mut grids = committed;
        let dispatches = {
            let mut ctx = StageContext::new(&mut self.backend, &mut grids, &layout, config, dt);
            advection::record(&mut ctx, AdvectionScratch { phi0, phi1 });
            forces::record(&mut ctx);
            vorticity::record(&mut ctx);
            projection::record(&mut ctx, iterations);
            ctx.dispatch_count()
        };

        let result = self.backend.execute();
        self.arena.recycle(phi0);
        self.arena.recycle(phi1);

        if let Err(err) = result {
            log::error!("[FireSimulation] Tick execution failed, fields unchanged: {}", err);
            self.backend.discard();
            return self.skip(SkipReason::BackendFailure);
        }

        self.grids = Some(grids);
        self.stepped_since_clear = true;

        let stats = TickStats {
            dispatches,
            pressure_iterations: iterations,
            duration: started.elapsed(),
        };
        self.monitor.record(stats);
        log::debug!(
            "[FireSimulation] Stepped dt={:.4}: {} dispatches, {} pressure iterations in {:.2}ms",
            dt,
            stats.dispatches,
            stats.pressure_iterations,
            stats.duration.as_secs_f32() * 1000.0
        );
        TickOutcome::Stepped(stats)
    }
}
