use std::collections::VecDeque;
use std::time::Duration;

/// What one physics tick recorded and how long it took on the host side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickStats {
    /// Kernel dispatches recorded for the tick
    pub dispatches: usize,

    /// Jacobi iterations run by the pressure solve
    pub pressure_iterations: u32,

    /// Record + execute time
    pub duration: Duration,
}

/// Aggregated tick metrics
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Average tick time in milliseconds
    pub tick_time_ms: f32,

    /// Slowest tick in the history window
    pub peak_tick_time_ms: f32,

    /// Average dispatches per tick
    pub dispatches_per_tick: f32,

    /// Physics ticks since the monitor was created
    pub total_ticks: u64,

    /// Ticks skipped for any reason
    pub skipped_ticks: u64,
}

/// Rolling history of physics tick timings
#[derive(Debug)]
pub struct TickMonitor {
    /// Per-tick history, oldest first
    history: VecDeque<TickStats>,

    /// History size
    history_size: usize,

    /// Current metrics
    current_metrics: TickMetrics,
}

impl Default for TickMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TickMonitor {
    /// 120 ticks is two seconds at 60 Hz.
    pub const DEFAULT_HISTORY: usize = 120;

    pub fn new() -> Self {
        Self::with_history(Self::DEFAULT_HISTORY)
    }

    pub fn with_history(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            history: VecDeque::with_capacity(history_size),
            history_size,
            current_metrics: TickMetrics::default(),
        }
    }

    pub fn record(&mut self, stats: TickStats) {
        self.history.push_back(stats);
        if self.history.len() > self.history_size {
            self.history.pop_front();
        }
        self.current_metrics.total_ticks += 1;
        self.update_metrics();
    }

    pub fn record_skip(&mut self) {
        self.current_metrics.skipped_ticks += 1;
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.current_metrics
    }

    pub fn last(&self) -> Option<&TickStats> {
        self.history.back()
    }

    /// Mean duration over the history window.
    pub fn average_duration(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        self.history.iter().map(|s| s.duration).sum::<Duration>() / self.history.len() as u32
    }

    pub fn total_ticks(&self) -> u64 {
        self.current_metrics.total_ticks
    }

    fn update_metrics(&mut self) {
        let count = self.history.len() as f32;
        let peak = self.history.iter().map(|s| s.duration).max().unwrap_or_default();
        let dispatches: usize = self.history.iter().map(|s| s.dispatches).sum();

        self.current_metrics.tick_time_ms = self.average_duration().as_secs_f32() * 1000.0;
        self.current_metrics.peak_tick_time_ms = peak.as_secs_f32() * 1000.0;
        self.current_metrics.dispatches_per_tick = dispatches as f32 / count;
    }
}
