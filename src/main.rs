//! Headless fire simulation driver
//!
//! Runs the solver for a fixed number of ticks with a fuel emitter in the
//! middle of the floor and reports timings and field statistics.
//!
//! Usage: fire-sim-headless [--reference] [--ticks N] [--extent X,Y,Z] [config.toml]

use anyhow::{bail, Context, Result};
use glam::{UVec3, Vec3};

use fire_simulation::{
    ComputeBackend, FieldKind, FireSimulation, FireSimulationConfig, ReferenceBackend,
    TickOutcome, WgpuBackend,
};

const TIME_STEP: f32 = 1.0 / 60.0;

struct Options {
    reference: bool,
    ticks: u32,
    extent: Vec3,
    config_path: Option<String>,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        reference: false,
        ticks: 120,
        extent: Vec3::new(400.0, 400.0, 800.0),
        config_path: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--reference" => options.reference = true,
            "--ticks" => {
                let value = args.next().context("--ticks needs a value")?;
                options.ticks = value.parse().context("--ticks must be a whole number")?;
            }
            "--extent" => {
                let value = args.next().context("--extent needs a value")?;
                let parts = value
                    .split(',')
                    .map(|part| part.trim().parse::<f32>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("--extent must be three numbers")?;
                if parts.len() != 3 {
                    bail!("--extent must be three numbers, got {}", parts.len());
                }
                options.extent = Vec3::from_slice(&parts);
            }
            other if other.starts_with("--") => bail!("Unknown option {}", other),
            path => options.config_path = Some(path.to_string()),
        }
    }

    Ok(options)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = parse_args()?;
    let config = match &options.config_path {
        Some(path) => FireSimulationConfig::load(path)?,
        None => FireSimulationConfig::default(),
    };

    if options.reference {
        log::info!("Using host reference backend");
        run(FireSimulation::new(ReferenceBackend::new()), &options, &config)
    } else {
        let backend = WgpuBackend::headless().context("GPU backend unavailable, try --reference")?;
        run(FireSimulation::new(backend), &options, &config)
    }
}

fn run<B: ComputeBackend>(
    mut simulation: FireSimulation<B>,
    options: &Options,
    config: &FireSimulationConfig,
) -> Result<()> {
    simulation.initialize(options.extent, config)?;

    let mut emitter_placed = false;
    for tick in 0..options.ticks {
        match simulation.tick(TIME_STEP, config) {
            TickOutcome::Allocated => {
                if !emitter_placed {
                    place_emitter(&mut simulation)?;
                    emitter_placed = true;
                }
            }
            TickOutcome::Skipped(reason) => log::warn!("Tick {} skipped: {:?}", tick, reason),
            TickOutcome::Stepped(_) | TickOutcome::Cleared => {}
        }
    }

    let fluid = simulation.read_field(FieldKind::Fluid)?;
    let texels = fluid.chunks_exact(4);
    let count = texels.len().max(1) as f32;
    let (mut smoke, mut peak_temperature, mut fuel) = (0.0f32, 0.0f32, 0.0f32);
    for texel in texels {
        smoke += texel[0];
        peak_temperature = peak_temperature.max(texel[1]);
        fuel += texel[2];
    }

    let metrics = simulation.monitor().metrics();
    println!("Ticks stepped:     {}", metrics.total_ticks);
    println!("Ticks skipped:     {}", metrics.skipped_ticks);
    println!("Average tick:      {:.3} ms", metrics.tick_time_ms);
    println!("Peak tick:         {:.3} ms", metrics.peak_tick_time_ms);
    println!("Mean smoke:        {:.5}", smoke / count);
    println!("Mean fuel:         {:.5}", fuel / count);
    println!("Peak temperature:  {:.2}", peak_temperature);

    Ok(())
}

/// Fill a block of fluid cells near the bottom centre with fuel.
fn place_emitter<B: ComputeBackend>(simulation: &mut FireSimulation<B>) -> Result<()> {
    let Some(layout) = simulation.layout() else {
        bail!("Simulation has no layout");
    };
    let fluid = layout.fluid;
    let resolution = fluid.resolution;
    let centre = resolution.as_vec3() * Vec3::new(0.5, 0.5, 0.1);
    let radius = resolution.min_element() as f32 * 0.15;

    let mut data = vec![0.0f32; fluid.cell_count() * 4];
    for index in 0..fluid.cell_count() {
        let cell: UVec3 = fluid.cell(index);
        if (cell.as_vec3() + 0.5).distance(centre) < radius {
            data[index * 4 + 2] = 1.0;
        }
    }

    simulation.write_field(FieldKind::Fluid, &data)?;
    log::info!("Placed fuel emitter at {:?} with radius {:.1} cells", centre, radius);
    Ok(())
}
