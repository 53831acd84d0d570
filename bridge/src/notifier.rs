//! Draw notifier.
//!
//! Tells the display consumer that new pixels are ready while a live render
//! runs. In poll mode a session-owned thread checks the engine's
//! buffer-updated flag at a fixed refresh rate; in callback mode the engine
//! calls [`redraw_callback`] on its own thread and no loop exists.
//!
//! When the consumer disappears the notifier ends and fires its stop
//! trigger. The trigger must hand the stop off to another thread: the
//! notifier thread is one of the threads a waiting stop would join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::engine::{DisplayConsumer, EngineCallback, EngineEventData, EngineSdk};
use crate::session::SceneSlot;
use crate::state::{SessionState, StateCell};
use crate::stats::sleep_while;
use crate::worker::Worker;

/// Default poll-mode refresh interval.
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(10);

/// How redraw requests reach the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStrategy {
    Poll { refresh: Duration },
    Callback,
}

impl Default for NotifyStrategy {
    fn default() -> Self {
        Self::Poll {
            refresh: DEFAULT_REFRESH,
        }
    }
}

/// Requests a non-blocking session stop.
pub type StopTrigger = Arc<dyn Fn() + Send + Sync>;

/// Result of one poll-mode iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTick {
    Continue,
    /// The display consumer is gone.
    ConsumerLost,
    /// The session left the live state.
    Terminated,
}

/// Poll-mode notifier loop.
pub struct DrawNotifier {
    pub state: Arc<StateCell>,
    pub engine: Arc<dyn EngineSdk>,
    pub scene: Arc<SceneSlot>,
    pub display: Weak<dyn DisplayConsumer>,
    pub refresh: Duration,
    pub on_consumer_lost: StopTrigger,
}

impl DrawNotifier {
    pub fn tick(&self) -> NotifyTick {
        let Some(display) = self.display.upgrade() else {
            return NotifyTick::ConsumerLost;
        };

        // The slot lock keeps the handle alive for the duration of the
        // engine call; deletion takes the same lock.
        let updated = {
            let slot = self.scene.lock();
            if !self.state.holds(SessionState::is_live) {
                return NotifyTick::Terminated;
            }
            match *slot {
                Some(handle) => self.engine.take_buffer_updated(handle),
                None => return NotifyTick::Terminated,
            }
        };

        if updated && display.request_redraw().is_err() {
            return NotifyTick::ConsumerLost;
        }
        NotifyTick::Continue
    }

    pub fn run(self) {
        while sleep_while(self.refresh, &self.state, SessionState::is_live) {
            match self.tick() {
                NotifyTick::Continue => {}
                NotifyTick::Terminated => break,
                NotifyTick::ConsumerLost => {
                    log::info!("display consumer went away; stopping live render");
                    (self.on_consumer_lost)();
                    break;
                }
            }
        }
        log::debug!("draw notifier finished");
    }

    pub fn spawn(self) -> std::io::Result<Worker> {
        Worker::spawn("lumen-draw-notifier", move || self.run())
    }
}

/// Engine-thread redraw handler for callback mode.
///
/// Never blocks: a vanished consumer fires `on_consumer_lost` once and later
/// invocations return immediately.
pub fn redraw_callback(
    display: Weak<dyn DisplayConsumer>,
    on_consumer_lost: StopTrigger,
) -> EngineCallback {
    let lost = AtomicBool::new(false);
    Arc::new(move |_: &EngineEventData| {
        if lost.load(Ordering::Acquire) {
            return;
        }
        let delivered = display
            .upgrade()
            .is_some_and(|display| display.request_redraw().is_ok());
        if !delivered && !lost.swap(true, Ordering::AcqRel) {
            log::info!("display consumer went away; stopping live render");
            on_consumer_lost();
        }
    })
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::dummy::{DummyDisplay, DummyEngine};
    use crate::engine::{RenderMode, SceneConfig, SceneHandle};
    use crate::state::Transition;

    fn counting_trigger() -> (StopTrigger, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let trigger: StopTrigger = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (trigger, count)
    }

    fn live_notifier(
        engine: Arc<DummyEngine>,
        display: Weak<dyn DisplayConsumer>,
        trigger: StopTrigger,
    ) -> (DrawNotifier, SceneHandle) {
        let handle = engine
            .create_scene(&SceneConfig {
                mode: RenderMode::Live,
                persistent: false,
            })
            .unwrap();
        let state = Arc::new(StateCell::new());
        state
            .apply(Transition::BeginExport(RenderMode::Live))
            .unwrap();
        state.apply(Transition::BeginRender).unwrap();

        let notifier = DrawNotifier {
            state,
            engine,
            scene: Arc::new(SceneSlot::with_handle(handle)),
            display,
            refresh: Duration::from_millis(1),
            on_consumer_lost: trigger,
        };
        (notifier, handle)
    }

    #[test]
    fn test_tick_redraws_on_buffer_update() {
        let engine = Arc::new(DummyEngine::new());
        let display = Arc::new(DummyDisplay::new());
        let as_dyn: Arc<dyn DisplayConsumer> = display.clone();
        let (trigger, _) = counting_trigger();
        let (notifier, handle) = live_notifier(engine.clone(), Arc::downgrade(&as_dyn), trigger);

        assert_eq!(notifier.tick(), NotifyTick::Continue);
        assert_eq!(display.redraws(), 0);

        engine.mark_buffer_updated(handle);
        assert_eq!(notifier.tick(), NotifyTick::Continue);
        assert_eq!(display.redraws(), 1);
    }

    #[test]
    fn test_run_triggers_stop_when_consumer_vanishes() {
        let engine = Arc::new(DummyEngine::new());
        let display: Arc<dyn DisplayConsumer> = Arc::new(DummyDisplay::new());
        let (trigger, count) = counting_trigger();
        let (notifier, _) = live_notifier(engine, Arc::downgrade(&display), trigger);

        let worker = notifier.spawn().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        drop(display);

        assert_eq!(
            worker.join_timeout(Duration::from_secs(1)),
            crate::worker::JoinStatus::Joined
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_redraw_counts_as_lost() {
        let engine = Arc::new(DummyEngine::new());
        let display = Arc::new(DummyDisplay::new());
        let as_dyn: Arc<dyn DisplayConsumer> = display.clone();
        let (trigger, _) = counting_trigger();
        let (notifier, handle) = live_notifier(engine.clone(), Arc::downgrade(&as_dyn), trigger);

        display.close();
        engine.mark_buffer_updated(handle);
        assert_eq!(notifier.tick(), NotifyTick::ConsumerLost);
    }

    #[test]
    fn test_redraw_callback_fires_trigger_once() {
        let display: Arc<dyn DisplayConsumer> = Arc::new(DummyDisplay::new());
        let (trigger, count) = counting_trigger();
        let callback = redraw_callback(Arc::downgrade(&display), trigger);

        callback(&EngineEventData::Redraw);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        drop(display);
        callback(&EngineEventData::Redraw);
        callback(&EngineEventData::Redraw);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
