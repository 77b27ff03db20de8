use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::{UVec3, Vec3, Vec4};

use super::*;
use crate::backend::{BufferHandle, CommandRecord, ComputeBackend, GridFormat, ReferenceBackend};
use crate::config::FireSimulationConfig;
use crate::grid::FieldKind;
use crate::kernels::host::{run_kernel, HostGrid};
use crate::kernels::{size_lane, KernelId, KernelParams, StencilParams};

/// 80 world units at cell size 10 gives 8³ velocity and 16³ fluid cells.
const N: u32 = 8;

fn extent() -> Vec3 {
    Vec3::splat(N as f32 * 10.0)
}

fn velocity_resolution() -> UVec3 {
    UVec3::splat(N)
}

fn fluid_resolution() -> UVec3 {
    UVec3::splat(N * 2)
}

fn allocated(config: &FireSimulationConfig) -> FireSimulation<ReferenceBackend> {
    let mut simulation = FireSimulation::new(ReferenceBackend::new());
    simulation.initialize(extent(), config).unwrap();
    assert_eq!(simulation.tick(0.016, config), TickOutcome::Allocated);
    simulation
}

/// Cells in storage order, x fastest.
fn cells(resolution: UVec3) -> impl Iterator<Item = UVec3> {
    (0..resolution.z).flat_map(move |z| {
        (0..resolution.y).flat_map(move |y| (0..resolution.x).map(move |x| UVec3::new(x, y, z)))
    })
}

fn vector_field(resolution: UVec3, f: impl Fn(UVec3) -> Vec4) -> Vec<f32> {
    cells(resolution).flat_map(|cell| f(cell).to_array()).collect()
}

fn scalar_field(resolution: UVec3, f: impl Fn(UVec3) -> f32) -> Vec<f32> {
    cells(resolution).map(f).collect()
}

fn smooth_velocity(cell: UVec3) -> Vec4 {
    let p = (cell.as_vec3() + 0.5) * PI / N as f32;
    Vec4::new(p.x.sin(), 0.5 * p.y.sin(), p.z.cos(), 0.0)
}

fn on_shell(cell: UVec3) -> bool {
    cell.min_element() == 0 || cell.max_element() == N - 1
}

fn mean_square(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>() / values.len() as f32
}

/// Divergence of a velocity field in an open domain, computed on the host.
fn divergence_of(velocity: &[f32]) -> Vec<f32> {
    let resolution = velocity_resolution();
    let mut field = HostGrid::filled(resolution, GridFormat::Rgba32Float, 0.0);
    field.write_floats(velocity).unwrap();
    let obstacles = HostGrid::filled(resolution, GridFormat::R32Float, 0.0);
    let mut output = HostGrid::filled(resolution, GridFormat::R32Float, 0.0);

    let params = KernelParams::Divergence(StencilParams {
        velocity_size: size_lane(resolution),
    });
    run_kernel(&params, &[&field, &obstacles], &mut output);
    output.to_floats()
}

fn dispatch_records(backend: &ReferenceBackend) -> Vec<(KernelId, Vec<BufferHandle>, BufferHandle)> {
    backend
        .trace()
        .iter()
        .filter_map(|record| match record {
            CommandRecord::Dispatch {
                kernel,
                reads,
                writes,
            } => Some((*kernel, reads.clone(), writes[0])),
            _ => None,
        })
        .collect()
}

#[test]
fn test_first_tick_only_allocates_and_clears() {
    let config = FireSimulationConfig::default();
    let mut simulation = FireSimulation::new(ReferenceBackend::new());
    simulation.initialize(extent(), &config).unwrap();
    assert_eq!(simulation.state(), SimulationState::AwaitingAllocation);
    assert_eq!(simulation.backend().allocation_count(), 0);

    assert_eq!(simulation.tick(0.016, &config), TickOutcome::Allocated);
    assert_eq!(simulation.state(), SimulationState::Ready);

    let kernels = simulation.backend().dispatched_kernels();
    assert_eq!(kernels.len(), 9);
    assert!(kernels
        .iter()
        .all(|k| matches!(k, KernelId::ClearFloat | KernelId::ClearFloat4)));
    assert_eq!(simulation.backend().allocation_count(), 9);
    assert!(simulation.field_views().is_none());

    for kind in FieldKind::ALL {
        let data = simulation.read_field(kind).unwrap();
        assert!(data.iter().all(|&v| v == 0.0), "{} not cleared", kind.label());
    }
}

#[test]
fn test_uninitialized_tick_is_skipped() {
    let mut simulation = FireSimulation::new(ReferenceBackend::new());

    assert_eq!(
        simulation.tick(0.016, &FireSimulationConfig::default()),
        TickOutcome::Skipped(SkipReason::NotInitialized)
    );
    assert!(matches!(
        simulation.read_field(FieldKind::Velocity),
        Err(SimulationError::NotAllocated)
    ));
    assert!(matches!(
        simulation.write_field(FieldKind::Obstacles, &[]),
        Err(SimulationError::NotAllocated)
    ));
    assert!(simulation.backend().trace().is_empty());
}

#[test]
fn test_initialize_rejects_bad_input_without_allocating() {
    let mut simulation = FireSimulation::new(ReferenceBackend::new());

    let mut config = FireSimulationConfig::default();
    config.cell_size = -1.0;
    assert!(simulation.initialize(extent(), &config).is_err());
    assert!(simulation
        .initialize(Vec3::new(80.0, 0.0, 80.0), &FireSimulationConfig::default())
        .is_err());

    assert_eq!(simulation.state(), SimulationState::Uninitialized);
    assert!(simulation.layout().is_none());
    assert_eq!(simulation.backend().allocation_count(), 0);
}

#[test]
fn test_host_not_ready_skips_without_side_effects() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    simulation.backend_mut().clear_trace();

    let ready = AtomicBool::new(false);
    assert_eq!(
        simulation.tick_with_host(&ready, 0.016, &config),
        TickOutcome::Skipped(SkipReason::HostNotReady)
    );
    assert!(simulation.backend().trace().is_empty());
    assert_eq!(simulation.monitor().metrics().skipped_ticks, 1);

    ready.store(true, Ordering::Release);
    assert!(matches!(
        simulation.tick_with_host(&ready, 0.016, &config),
        TickOutcome::Stepped(_)
    ));
}

#[test]
fn test_invalid_tick_input_is_rejected() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    let before = simulation.buffer_set().cloned();

    let mut bad = config.clone();
    bad.num_pressure_iterations = -2;
    assert_eq!(
        simulation.tick(0.016, &bad),
        TickOutcome::Skipped(SkipReason::InvalidConfig)
    );
    assert_eq!(
        simulation.tick(-0.016, &config),
        TickOutcome::Skipped(SkipReason::InvalidConfig)
    );
    assert_eq!(
        simulation.tick(f32::NAN, &config),
        TickOutcome::Skipped(SkipReason::InvalidConfig)
    );

    assert_eq!(simulation.buffer_set().cloned(), before);
    assert_eq!(simulation.state(), SimulationState::Ready);
}

#[test]
fn test_zero_time_step_leaves_fields_unchanged() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);

    let velocity = vector_field(velocity_resolution(), smooth_velocity);
    let fluid = vector_field(fluid_resolution(), |c| {
        Vec4::new(0.5 + 0.01 * c.x as f32, 300.0 - c.z as f32, 0.3, 0.1)
    });
    let centre = UVec3::splat(N / 2);
    let pressure = scalar_field(velocity_resolution(), |c| if c == centre { 1.0 } else { 0.0 });

    simulation.write_field(FieldKind::Velocity, &velocity).unwrap();
    simulation.write_field(FieldKind::Fluid, &fluid).unwrap();
    simulation.write_field(FieldKind::Pressure, &pressure).unwrap();

    assert!(matches!(simulation.tick(0.0, &config), TickOutcome::Stepped(_)));

    assert_eq!(simulation.read_field(FieldKind::Velocity).unwrap(), velocity);
    assert_eq!(simulation.read_field(FieldKind::Fluid).unwrap(), fluid);
    // The Jacobi solve keeps relaxing a warm-started pressure even at dt = 0.
    assert_ne!(simulation.read_field(FieldKind::Pressure).unwrap(), pressure);
}

#[test]
fn test_zero_time_step_zeroes_only_solid_cells() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);

    let obstacles = scalar_field(velocity_resolution(), |c| if on_shell(c) { 1.0 } else { 0.0 });
    let velocity = vector_field(velocity_resolution(), |c| smooth_velocity(c) + Vec4::ONE);
    let fluid = vector_field(fluid_resolution(), |c| {
        Vec4::new(0.5 + 0.01 * c.x as f32, 300.0 - c.z as f32, 0.3, 0.1)
    });
    simulation.write_field(FieldKind::Obstacles, &obstacles).unwrap();
    simulation.write_field(FieldKind::Velocity, &velocity).unwrap();
    simulation.write_field(FieldKind::Fluid, &fluid).unwrap();

    assert!(matches!(simulation.tick(0.0, &config), TickOutcome::Stepped(_)));

    let after = simulation.read_field(FieldKind::Velocity).unwrap();
    for ((cell, before), texel) in cells(velocity_resolution())
        .zip(velocity.chunks_exact(4))
        .zip(after.chunks_exact(4))
    {
        if on_shell(cell) {
            assert!(texel.iter().all(|&v| v == 0.0), "velocity kept in solid cell {:?}", cell);
        } else {
            assert_eq!(texel, before, "velocity changed at {:?}", cell);
        }
    }

    let after = simulation.read_field(FieldKind::Fluid).unwrap();
    for ((cell, before), texel) in cells(fluid_resolution())
        .zip(fluid.chunks_exact(4))
        .zip(after.chunks_exact(4))
    {
        if on_shell(cell / 2) {
            assert!(texel.iter().all(|&v| v == 0.0), "fluid kept in solid cell {:?}", cell);
        } else {
            assert_eq!(texel, before, "fluid changed at {:?}", cell);
        }
    }
}

#[test]
fn test_reset_clears_every_grid() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);

    simulation
        .write_field(FieldKind::Velocity, &vector_field(velocity_resolution(), smooth_velocity))
        .unwrap();
    simulation
        .write_field(
            FieldKind::Fluid,
            &vector_field(fluid_resolution(), |_| Vec4::new(1.0, 500.0, 0.5, 0.2)),
        )
        .unwrap();
    for _ in 0..3 {
        assert!(matches!(simulation.tick(0.05, &config), TickOutcome::Stepped(_)));
    }
    assert!(simulation.field_views().is_some());

    simulation.request_reset();
    assert_eq!(simulation.state(), SimulationState::Clearing);
    assert_eq!(simulation.tick(0.05, &config), TickOutcome::Cleared);
    assert_eq!(simulation.state(), SimulationState::Ready);
    assert!(simulation.field_views().is_none());

    let handles = simulation.buffer_set().unwrap().all_handles();
    for (kind, handle) in handles {
        let data = simulation.backend_mut().read_grid(handle).unwrap();
        assert!(data.iter().all(|&v| v == 0.0), "{} not cleared", kind.label());
    }
}

#[test]
fn test_projection_reduces_divergence() {
    let config = FireSimulationConfig {
        buoyancy: 0.0,
        density_weight: 0.0,
        vorticity_strength: 0.0,
        dissipation: Vec3::ZERO,
        ..Default::default()
    };
    let mut simulation = allocated(&config);
    simulation
        .write_field(FieldKind::Velocity, &vector_field(velocity_resolution(), smooth_velocity))
        .unwrap();

    assert!(matches!(simulation.tick(0.1, &config), TickOutcome::Stepped(_)));

    // The divergence grid holds the field projection started from.
    let before = mean_square(&simulation.read_field(FieldKind::Divergence).unwrap());
    let after = mean_square(&divergence_of(&simulation.read_field(FieldKind::Velocity).unwrap()));

    assert!(before > 0.01, "scenario should start divergent, got {}", before);
    assert!(after < before, "divergence grew: {} -> {}", before, after);
}

#[test]
fn test_solid_shell_holds_no_velocity() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);

    let obstacles = scalar_field(velocity_resolution(), |c| if on_shell(c) { 1.0 } else { 0.0 });
    simulation.write_field(FieldKind::Obstacles, &obstacles).unwrap();
    simulation
        .write_field(
            FieldKind::Velocity,
            &vector_field(velocity_resolution(), |c| smooth_velocity(c) + Vec4::new(1.0, 1.0, 1.0, 0.0)),
        )
        .unwrap();
    simulation
        .write_field(
            FieldKind::Fluid,
            &vector_field(fluid_resolution(), |_| Vec4::new(1.0, 400.0, 0.5, 0.0)),
        )
        .unwrap();

    for _ in 0..2 {
        assert!(matches!(simulation.tick(0.1, &config), TickOutcome::Stepped(_)));
    }

    let velocity = simulation.read_field(FieldKind::Velocity).unwrap();
    let mut interior_moving = false;
    for (cell, texel) in cells(velocity_resolution()).zip(velocity.chunks_exact(4)) {
        if on_shell(cell) {
            assert!(texel[..3].iter().all(|&v| v == 0.0), "flow inside solid cell {:?}", cell);
        } else {
            interior_moving |= texel[..3].iter().any(|&v| v != 0.0);
        }
    }
    assert!(interior_moving);

    let fluid = simulation.read_field(FieldKind::Fluid).unwrap();
    for (cell, texel) in cells(fluid_resolution()).zip(fluid.chunks_exact(4)) {
        if on_shell(cell / 2) {
            assert!(texel.iter().all(|&v| v == 0.0), "fluid inside solid cell {:?}", cell);
        }
    }
}

#[test]
fn test_zero_pressure_iterations_skip_correction() {
    let config = FireSimulationConfig {
        num_pressure_iterations: 0,
        ..Default::default()
    };
    let mut simulation = allocated(&config);
    simulation
        .write_field(FieldKind::Velocity, &vector_field(velocity_resolution(), smooth_velocity))
        .unwrap();
    simulation
        .write_field(FieldKind::Pressure, &scalar_field(velocity_resolution(), |c| c.x as f32))
        .unwrap();
    simulation.backend_mut().clear_trace();

    assert!(matches!(simulation.tick(0.1, &config), TickOutcome::Stepped(_)));

    let records = dispatch_records(simulation.backend());
    assert!(records.iter().all(|(kernel, ..)| *kernel != KernelId::Pressure));
    let (_, reads, output) = records
        .iter()
        .find(|(kernel, ..)| *kernel == KernelId::Projection)
        .cloned()
        .unwrap();

    let projected_from = simulation.backend_mut().read_grid(reads[0]).unwrap();
    let projected = simulation.backend_mut().read_grid(output).unwrap();
    assert_eq!(projected, projected_from);
    assert!(simulation
        .read_field(FieldKind::Pressure)
        .unwrap()
        .iter()
        .all(|&p| p == 0.0));
}

#[test]
fn test_stage_order_and_buffer_flow() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    let before = simulation.buffer_set().cloned().unwrap();
    simulation.backend_mut().clear_trace();

    assert!(matches!(simulation.tick(0.016, &config), TickOutcome::Stepped(_)));

    let records = dispatch_records(simulation.backend());
    let kernels: Vec<KernelId> = records.iter().map(|(k, ..)| *k).collect();
    let mut expected = vec![
        KernelId::PrepareFluidAdvection,
        KernelId::PrepareFluidAdvection,
        KernelId::AdvectFluid,
        KernelId::AdvectVelocity,
        KernelId::Buoyancy,
        KernelId::Extinguish,
        KernelId::Vorticity,
        KernelId::Confinement,
        KernelId::Divergence,
    ];
    expected.extend(std::iter::repeat(KernelId::Pressure).take(8));
    expected.push(KernelId::Projection);
    assert_eq!(kernels, expected);

    let output = |i: usize| records[i].2;
    let reads = |i: usize| records[i].1.clone();

    // Both MacCormack traces start from the committed velocity and fluid.
    assert_eq!(reads(0)[..2], [before.velocity.current, before.fluid.current]);
    assert_eq!(reads(1)[1], output(0));
    assert_eq!(reads(2)[2..4], [output(1), output(0)]);

    // Velocity advection reads the field fluid advection used.
    assert_eq!(reads(3)[0], before.velocity.current);
    // Buoyancy sees advected velocity and advected fluid.
    assert_eq!(reads(4)[..2], [output(3), output(2)]);
    assert_eq!(reads(5)[0], output(2));
    assert_eq!(reads(6)[0], output(4));
    assert_eq!(reads(7), vec![output(4), output(6)]);
    assert_eq!(reads(8)[0], output(7));

    for i in 9..17 {
        assert_eq!(reads(i)[1], output(8));
        if i > 9 {
            assert_eq!(reads(i)[0], output(i - 1));
        }
    }
    assert_eq!(reads(17)[..2], [output(7), output(16)]);

    let after = simulation.buffer_set().unwrap();
    assert_eq!(after.velocity.current, output(17));
    assert_eq!(after.fluid.current, output(5));
    assert_eq!(after.pressure.current, output(16));
    assert_eq!(simulation.backend().swap_count(), 14);

    let views = simulation.field_views().unwrap();
    assert_eq!(views.velocity.handle, after.velocity.current);
    assert_eq!(views.fluid.grid.resolution, fluid_resolution());
    assert_eq!(views.pressure.format, GridFormat::R32Float);
}

#[test]
fn test_failed_execute_leaves_fields_unchanged() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    let velocity = vector_field(velocity_resolution(), smooth_velocity);
    simulation.write_field(FieldKind::Velocity, &velocity).unwrap();
    let before = simulation.buffer_set().cloned();

    simulation.backend_mut().fail_next_execute();
    assert_eq!(
        simulation.tick(0.1, &config),
        TickOutcome::Skipped(SkipReason::BackendFailure)
    );

    assert_eq!(simulation.buffer_set().cloned(), before);
    assert_eq!(simulation.read_field(FieldKind::Velocity).unwrap(), velocity);
    assert_eq!(simulation.backend().pending_count(), 0);
    assert!(simulation.field_views().is_none());

    assert!(matches!(simulation.tick(0.1, &config), TickOutcome::Stepped(_)));
}

#[test]
fn test_failed_allocation_retries_from_the_pool() {
    let config = FireSimulationConfig::default();
    let mut simulation = FireSimulation::new(ReferenceBackend::new());
    simulation.initialize(extent(), &config).unwrap();

    simulation.backend_mut().limit_allocations(5);
    assert_eq!(
        simulation.tick(0.016, &config),
        TickOutcome::Skipped(SkipReason::BackendFailure)
    );
    assert_eq!(simulation.state(), SimulationState::AwaitingAllocation);
    assert!(simulation.buffer_set().is_none());

    simulation.backend_mut().limit_allocations(usize::MAX);
    assert_eq!(simulation.tick(0.016, &config), TickOutcome::Allocated);
    assert_eq!(simulation.backend().allocation_count(), 9);
}

#[test]
fn test_advection_scratch_is_pooled() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);

    for _ in 0..3 {
        assert!(matches!(simulation.tick(0.016, &config), TickOutcome::Stepped(_)));
    }

    assert_eq!(simulation.backend().allocation_count(), 11);
    assert_eq!(simulation.monitor().total_ticks(), 3);
    let last = simulation.monitor().last().copied().unwrap();
    assert_eq!(last.dispatches, 18);
    assert_eq!(last.pressure_iterations, 8);
}

#[test]
fn test_resolution_change_reallocates() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    assert!(matches!(simulation.tick(0.016, &config), TickOutcome::Stepped(_)));
    simulation.backend_mut().clear_trace();

    let finer = FireSimulationConfig {
        cell_size: 5.0,
        ..config.clone()
    };
    assert_eq!(simulation.tick(0.016, &finer), TickOutcome::Allocated);

    let layout = simulation.layout().unwrap();
    assert_eq!(layout.velocity.resolution, UVec3::splat(16));
    assert_eq!(layout.fluid.resolution, UVec3::splat(32));

    let releases = simulation
        .backend()
        .trace()
        .iter()
        .filter(|record| matches!(record, CommandRecord::Release(_)))
        .count();
    assert_eq!(releases, 11);
    assert_eq!(simulation.backend().grid_count(), 9);
    assert!(matches!(simulation.tick(0.016, &finer), TickOutcome::Stepped(_)));
}

#[test]
fn test_reinitialize_keeps_or_rebuilds_grids() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    let grids = simulation.buffer_set().cloned();

    simulation.initialize(extent(), &config).unwrap();
    assert_eq!(simulation.state(), SimulationState::Ready);

    // 81 units still snaps to 8 cells per axis.
    simulation.initialize(Vec3::splat(81.0), &config).unwrap();
    assert_eq!(simulation.state(), SimulationState::Ready);
    assert_eq!(simulation.buffer_set().cloned(), grids);
    assert_eq!(simulation.layout().unwrap().extent, Vec3::splat(81.0));

    simulation.initialize(Vec3::splat(160.0), &config).unwrap();
    assert_eq!(simulation.state(), SimulationState::AwaitingAllocation);
    assert!(simulation.buffer_set().is_none());
    assert_eq!(simulation.backend().grid_count(), 0);
}

#[test]
fn test_deinitialize_releases_everything() {
    let config = FireSimulationConfig::default();
    let mut simulation = allocated(&config);
    assert!(matches!(simulation.tick(0.016, &config), TickOutcome::Stepped(_)));

    simulation.deinitialize();

    assert_eq!(simulation.state(), SimulationState::Uninitialized);
    assert_eq!(simulation.backend().grid_count(), 0);
    assert_eq!(
        simulation.tick(0.016, &config),
        TickOutcome::Skipped(SkipReason::NotInitialized)
    );
}

#[test]
fn test_combustion_heats_and_stays_finite() {
    let config = FireSimulationConfig {
        temperature_distribution: Vec3::new(100.0, 1.0, 0.0),
        ..Default::default()
    };
    let mut simulation = allocated(&config);
    let fuel = vector_field(fluid_resolution(), |c| {
        if (c.as_vec3() - 7.5).length() < 3.0 {
            Vec4::new(0.0, 0.0, 1.0, 0.0)
        } else {
            Vec4::ZERO
        }
    });
    simulation.write_field(FieldKind::Fluid, &fuel).unwrap();

    for _ in 0..10 {
        assert!(matches!(simulation.tick(0.1, &config), TickOutcome::Stepped(_)));
    }

    let fluid = simulation.read_field(FieldKind::Fluid).unwrap();
    assert!(fluid.iter().all(|v| v.is_finite()));
    let texels: Vec<&[f32]> = fluid.chunks_exact(4).collect();
    assert!(texels.iter().any(|t| t[1] > 0.0), "no heat released");
    assert!(texels.iter().any(|t| t[0] > 0.0), "no smoke released");
    assert!(texels.iter().all(|t| t[2] < 1.0), "fuel did not burn");
    assert!(simulation
        .read_field(FieldKind::Velocity)
        .unwrap()
        .iter()
        .all(|v| v.is_finite()));
}
