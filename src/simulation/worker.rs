//! Dedicated solver thread
//!
//! The invoking context hands commands over a channel and the solver thread
//! runs them one at a time, so ticks never overlap and always run in the
//! order they were sent.

use std::thread::JoinHandle;

use glam::Vec3;

use crate::backend::ComputeBackend;
use crate::config::{ConfigError, FireSimulationConfig};
use crate::grid::FieldKind;

use super::orchestrator::{FireSimulation, SimulationError, TickOutcome};

pub enum SimulationCommand {
    Initialize {
        extent: Vec3,
        config: FireSimulationConfig,
    },
    Tick {
        dt: f32,
        config: FireSimulationConfig,
    },
    Reset,
    ReadField(FieldKind),
    Shutdown,
}

#[derive(Debug)]
pub enum SimulationEvent {
    Initialized(Result<(), ConfigError>),
    Ticked(TickOutcome),
    Field {
        kind: FieldKind,
        data: Result<Vec<f32>, SimulationError>,
    },
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Simulation worker has shut down")]
    Disconnected,

    #[error("Failed to spawn simulation worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Simulation worker panicked")]
    Panicked,
}

/// Handle to a solver running on its own thread.
pub struct SimulationWorker {
    commands: flume::Sender<SimulationCommand>,
    events: flume::Receiver<SimulationEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SimulationWorker {
    /// Move `simulation` onto a new thread.
    pub fn spawn<B>(simulation: FireSimulation<B>) -> Result<Self, WorkerError>
    where
        B: ComputeBackend + Send + 'static,
    {
        let (command_tx, command_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        let thread = std::thread::Builder::new()
            .name("fire-simulation".to_string())
            .spawn(move || run(simulation, command_rx, event_tx))
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    pub fn send(&self, command: SimulationCommand) -> Result<(), WorkerError> {
        self.commands.send(command).map_err(|_| WorkerError::Disconnected)
    }

    pub fn initialize(&self, extent: Vec3, config: FireSimulationConfig) -> Result<(), WorkerError> {
        self.send(SimulationCommand::Initialize { extent, config })
    }

    pub fn tick(&self, dt: f32, config: FireSimulationConfig) -> Result<(), WorkerError> {
        self.send(SimulationCommand::Tick { dt, config })
    }

    pub fn request_reset(&self) -> Result<(), WorkerError> {
        self.send(SimulationCommand::Reset)
    }

    pub fn request_field(&self, kind: FieldKind) -> Result<(), WorkerError> {
        self.send(SimulationCommand::ReadField(kind))
    }

    /// Block until the worker publishes its next event.
    pub fn recv_event(&self) -> Result<SimulationEvent, WorkerError> {
        self.events.recv().map_err(|_| WorkerError::Disconnected)
    }

    pub fn try_recv_event(&self) -> Option<SimulationEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the worker after it drains the commands already sent.
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The thread may already be gone if it panicked.
        self.commands.send(SimulationCommand::Shutdown).ok();
        thread.join().map_err(|_| WorkerError::Panicked)
    }
}

impl Drop for SimulationWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("[SimulationWorker] {}", err);
        }
    }
}

fn run<B: ComputeBackend>(
    mut simulation: FireSimulation<B>,
    commands: flume::Receiver<SimulationCommand>,
    events: flume::Sender<SimulationEvent>,
) {
    log::debug!("[SimulationWorker] Started");

    while let Ok(command) = commands.recv() {
        let event = match command {
            SimulationCommand::Initialize { extent, config } => {
                SimulationEvent::Initialized(simulation.initialize(extent, &config))
            }
            SimulationCommand::Tick { dt, config } => {
                SimulationEvent::Ticked(simulation.tick(dt, &config))
            }
            SimulationCommand::Reset => {
                simulation.request_reset();
                continue;
            }
            SimulationCommand::ReadField(kind) => SimulationEvent::Field {
                kind,
                data: simulation.read_field(kind),
            },
            SimulationCommand::Shutdown => break,
        };

        if events.send(event).is_err() {
            log::debug!("[SimulationWorker] Event receiver dropped");
        }
    }

    simulation.deinitialize();
    log::debug!("[SimulationWorker] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReferenceBackend;

    #[test]
    fn test_worker_runs_commands_in_order() {
        let worker = SimulationWorker::spawn(FireSimulation::new(ReferenceBackend::new())).unwrap();
        let config = FireSimulationConfig::default();

        worker.initialize(Vec3::splat(80.0), config.clone()).unwrap();
        worker.tick(0.016, config.clone()).unwrap();
        worker.tick(0.016, config.clone()).unwrap();
        worker.request_field(FieldKind::Obstacles).unwrap();

        assert!(matches!(worker.recv_event().unwrap(), SimulationEvent::Initialized(Ok(()))));
        assert!(matches!(
            worker.recv_event().unwrap(),
            SimulationEvent::Ticked(TickOutcome::Allocated)
        ));
        assert!(matches!(
            worker.recv_event().unwrap(),
            SimulationEvent::Ticked(TickOutcome::Stepped(_))
        ));
        match worker.recv_event().unwrap() {
            SimulationEvent::Field { kind, data } => {
                assert_eq!(kind, FieldKind::Obstacles);
                let data = data.unwrap();
                assert_eq!(data.len(), 8 * 8 * 8);
                assert!(data.iter().all(|&v| v == 0.0));
            }
            other => panic!("unexpected event {:?}", other),
        }

        worker.shutdown().unwrap();
    }

    #[test]
    fn test_worker_reports_rejected_initialize() {
        let worker = SimulationWorker::spawn(FireSimulation::new(ReferenceBackend::new())).unwrap();

        worker
            .initialize(Vec3::new(0.0, 1.0, 1.0), FireSimulationConfig::default())
            .unwrap();
        assert!(matches!(worker.recv_event().unwrap(), SimulationEvent::Initialized(Err(_))));
    }
}
