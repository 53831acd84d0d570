use std::sync::atomic::{AtomicUsize, Ordering};

use lumen_bridge::{DisplayConsumer, DisplayGone, FramebufferPixels, RenderStats, StatsStatus};

/// Display consumer for a terminal: counts redraws and logs what arrives.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    redraws: AtomicUsize,
    frames: AtomicUsize,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::Relaxed)
    }
}

impl DisplayConsumer for ConsoleDisplay {
    fn request_redraw(&self) -> Result<(), DisplayGone> {
        self.redraws.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn present(&self, pixels: &FramebufferPixels) -> Result<(), DisplayGone> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let sum: f32 = pixels.data.iter().sum();
        let mean = if pixels.data.is_empty() {
            0.0
        } else {
            sum / pixels.data.len() as f32
        };
        log::debug!(
            "pixels {}x{}x{} (mean {mean:.3})",
            pixels.width,
            pixels.height,
            pixels.channels
        );
        Ok(())
    }

    fn refresh_stats(&self, stats: &RenderStats) -> Result<(), DisplayGone> {
        match stats.status {
            StatsStatus::Available => log::debug!(
                "{:?} {:.0}% | {} samples | {:.1} MB",
                stats.phase,
                stats.progress * 100.0,
                stats.samples,
                stats.memory_mb
            ),
            StatsStatus::Unavailable => {
                log::debug!("{:?} {:.0}%", stats.phase, stats.progress * 100.0)
            }
        }
        Ok(())
    }

    fn report(&self, message: &str) {
        log::error!("{message}");
    }
}
