//! Render statistics and the pollers that refresh them.
//!
//! Snapshots are published whole: the poller builds a new [`RenderStats`] and
//! swaps it in, so readers never see a half-written value. Telemetry is
//! best-effort; an unreachable backend degrades the snapshot to
//! [`StatsStatus::Unavailable`] and never interrupts a render.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use crate::engine::{DisplayConsumer, TelemetryBackend};
use crate::state::{SessionState, StateCell};
use crate::worker::Worker;

/// Which part of a start the stats describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsPhase {
    /// Scene export.
    Export,
    #[default]
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsStatus {
    Available,
    #[default]
    Unavailable,
}

/// Raw metrics as reported by the telemetry backend.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub samples: u32,
    pub elapsed_ms: u64,
    pub memory_mb: f32,
}

/// Stats as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderStats {
    pub phase: StatsPhase,
    /// Engine progress in `[0, 1]`.
    pub progress: f32,
    pub samples: u32,
    pub elapsed: Duration,
    pub memory_mb: f32,
    pub status: StatsStatus,
}

/// Single-writer, multi-reader holder of the latest snapshot.
#[derive(Debug, Default)]
pub struct StatsCell {
    latest: RwLock<Arc<RenderStats>>,
}

impl StatsCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, stats: RenderStats) {
        let stats = Arc::new(stats);
        *self.latest.write() = stats;
    }

    pub fn snapshot(&self) -> Arc<RenderStats> {
        self.latest.read().clone()
    }
}

/// Last progress value reported by the engine's progress callback.
#[derive(Debug, Default)]
pub struct ProgressCell(AtomicU32);

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, progress: f32) {
        self.0
            .store(progress.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Background loop that refreshes a [`StatsCell`] while `running` holds.
pub struct StatsPoller {
    pub phase: StatsPhase,
    pub state: Arc<StateCell>,
    pub running: fn(&SessionState) -> bool,
    pub telemetry: Arc<dyn TelemetryBackend>,
    pub stats: Arc<StatsCell>,
    pub progress: Arc<ProgressCell>,
    pub display: Option<Weak<dyn DisplayConsumer>>,
    pub interval: Duration,
}

impl StatsPoller {
    /// Reads telemetry once, publishes the result and refreshes the display
    /// if it still exists.
    pub fn poll_once(&self) -> RenderStats {
        let mut stats = RenderStats {
            phase: self.phase,
            progress: self.progress.get(),
            ..RenderStats::default()
        };

        if self.telemetry.is_connected() {
            match self.telemetry.snapshot(self.phase) {
                Ok(snapshot) => {
                    stats.samples = snapshot.samples;
                    stats.elapsed = Duration::from_millis(snapshot.elapsed_ms);
                    stats.memory_mb = snapshot.memory_mb;
                    stats.status = StatsStatus::Available;
                }
                Err(e) => log::debug!("telemetry snapshot unavailable: {e}"),
            }
        }

        self.stats.publish(stats);

        if let Some(display) = self.display.as_ref().and_then(Weak::upgrade)
            && let Err(e) = display.refresh_stats(&stats)
        {
            log::debug!("skipping stats refresh: {e}");
        }

        stats
    }

    pub fn run(self) {
        log::debug!("{:?} stats poller started", self.phase);
        while sleep_while(self.interval, &self.state, self.running) {
            self.poll_once();
        }
        log::debug!("{:?} stats poller finished", self.phase);
    }

    pub fn spawn(self, name: &str) -> std::io::Result<Worker> {
        Worker::spawn(name, move || self.run())
    }
}

/// Sleeps for `interval` in short slices. Returns `false` as soon as
/// `running` stops holding, so pollers observe a stop promptly.
pub(crate) fn sleep_while(
    interval: Duration,
    state: &StateCell,
    running: fn(&SessionState) -> bool,
) -> bool {
    const SLICE: Duration = Duration::from_millis(5);

    let mut remaining = interval;
    loop {
        if !state.holds(running) {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}
