//! Common utilities for session integration tests.
//!
//! Every test builds a [`TestRig`] around the dummy collaborators so it can
//! inspect what the session asked the engine, exporter and display to do.

#![allow(dead_code)]

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lumen_bridge::dummy::{DummyDisplay, DummyStack};
use lumen_bridge::{
    BridgeConfig, BridgeContext, DisplayConsumer, NotifyStrategy, RenderMode, RenderOutcome,
    Session, StartConfig, ViewContext,
};

/// Config with short intervals so tests do not sit in sleeps.
pub fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.timing.stats_interval_ms = 5;
    config.timing.refresh_interval_ms = 10;
    config.timing.render_poll_interval_ms = 1;
    config.timing.stop_lock_timeout_ms = 1000;
    config.timing.join_timeout_ms = 1000;
    config
}

/// Blocking modes the start template supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {
    Batch,
    Bake,
    Swatch,
    External,
}

impl BlockingMode {
    pub fn render_mode(self) -> RenderMode {
        match self {
            BlockingMode::Batch => RenderMode::Batch,
            BlockingMode::Bake => RenderMode::Bake,
            BlockingMode::Swatch => RenderMode::Swatch,
            BlockingMode::External => RenderMode::External,
        }
    }

    pub fn start(self, session: &Session, config: StartConfig) -> RenderOutcome {
        let result = match self {
            BlockingMode::Batch => session.start_batch(config),
            BlockingMode::Bake => session.start_bake(config),
            BlockingMode::Swatch => session.start_swatch(config),
            BlockingMode::External => session.start_external(config),
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => panic!("{self:?} render failed: {e}"),
        }
    }
}

/// Dummy collaborators, an initialized context and one display consumer.
pub struct TestRig {
    pub stack: DummyStack,
    pub context: Arc<BridgeContext>,
    pub display: Arc<DummyDisplay>,
    display_dyn: Option<Arc<dyn DisplayConsumer>>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let stack = DummyStack::new();
        let context = BridgeContext::init(stack.collaborators(), config);
        let display = Arc::new(DummyDisplay::new());
        let display_dyn: Arc<dyn DisplayConsumer> = display.clone();
        Self {
            stack,
            context,
            display,
            display_dyn: Some(display_dyn),
        }
    }

    pub fn session(&self) -> Session {
        self.context.new_session()
    }

    pub fn weak_display(&self) -> Weak<dyn DisplayConsumer> {
        match &self.display_dyn {
            Some(display) => Arc::downgrade(display),
            None => Weak::<DummyDisplay>::new(),
        }
    }

    /// Drops the rig's strong references to the display. The consumer is
    /// gone once the test drops its own clone of [`TestRig::display`].
    pub fn drop_display(&mut self) {
        self.display_dyn = None;
        self.display = Arc::new(DummyDisplay::new());
    }

    /// Start options with this rig's display attached and a view matching
    /// the dummy framebuffer.
    pub fn start_config(&self) -> StartConfig {
        StartConfig {
            view: ViewContext {
                width: 32,
                height: 32,
                ..ViewContext::default()
            },
            display: Some(self.weak_display()),
            ..StartConfig::default()
        }
    }

    pub fn live_config(&self, notifier: NotifyStrategy) -> StartConfig {
        StartConfig {
            notifier: Some(notifier),
            ..self.start_config()
        }
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
