//! Render session orchestrator.
//!
//! A [`Session`] owns one scene graph at a time and drives it through a
//! single start template for every render mode:
//!
//! 1. preflight (no side effects on failure)
//! 2. create the scene graph, or reuse the retained one under persistent data
//! 3. full export, watched by the export-stats poller
//! 4. callback registration
//! 5. render command, then either a blocking poll loop or live workers
//!
//! Any failure in steps 2-5 runs a non-blocking teardown, which releases the
//! scene graph and every callback registration before the error is returned.
//!
//! Starts are serialized by their own lock. Until step 5 has wired up the
//! render, the start thread owns the scene graph: a [`Session::stop`] from
//! another thread only marks the session stopping, and the start notices at
//! its next step, tears down and returns [`RenderOutcome::Cancelled`].
//!
//! # Threads
//!
//! Live renders run a stats poller and, in poll mode, a draw notifier. Both
//! read the shared [`StateCell`] and exit once it leaves the rendering state.
//! Engine calls that take a scene handle are made while holding the
//! [`SceneSlot`] lock, and deletion takes the same lock, so a worker never
//! touches a deleted handle even when `stop` did not wait for it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, MutexGuard};

use crate::cancellation::CancellationToken;
use crate::context::BridgeContext;
use crate::engine::{
    DisplayConsumer, EngineCallback, EngineEvent, EngineEventData, RenderCommand, RenderMode,
    SceneConfig, SceneDiff, SceneHandle, ViewContext,
};
use crate::error::{BridgeError, BridgeResult};
use crate::framebuffer::{FramebufferAccessor, FramebufferLayout, FramebufferRequest};
use crate::notifier::{self, DrawNotifier, NotifyStrategy, StopTrigger};
use crate::preflight::FailureSurface;
use crate::registry::{CallbackRegistry, SessionId};
use crate::state::{SessionState, StateCell, Transition};
use crate::stats::{ProgressCell, RenderStats, StatsCell, StatsPhase, StatsPoller};
use crate::worker::{JoinStatus, Worker};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lock-guarded home of the scene handle.
#[derive(Debug, Default)]
pub struct SceneSlot {
    handle: Mutex<Option<SceneHandle>>,
}

impl SceneSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: SceneHandle) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<SceneHandle>> {
        self.handle.lock()
    }

    pub fn get(&self) -> Option<SceneHandle> {
        *self.handle.lock()
    }
}

/// How a start call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The engine finished the frame.
    Completed,
    /// The host interrupted the render, or it was stopped from elsewhere.
    Cancelled,
    /// The engine exited through its exit callback before finishing.
    EngineExit(i32),
    /// Interactive render is running in the background.
    Live,
}

/// What a stop call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call performed the teardown.
    Stopped,
    /// Nothing to stop.
    AlreadyIdle,
    /// A start was still setting up. The session is marked stopping and the
    /// start call tears down on its own thread, returning
    /// [`RenderOutcome::Cancelled`].
    Deferred,
    /// Another stop owns the transition; this call did nothing.
    LockTimeout,
}

/// Mode-independent start options supplied by the host.
#[derive(Clone, Default)]
pub struct StartConfig {
    pub view: ViewContext,
    /// Overrides the configured persistent-data policy (batch only).
    pub persistent: Option<bool>,
    pub display: Option<Weak<dyn DisplayConsumer>>,
    /// Overrides the configured notifier strategy (interactive only).
    pub notifier: Option<NotifyStrategy>,
    /// Render into the editor viewport instead of a render window.
    pub viewport: bool,
}

/// How the start template finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Drive {
    /// Poll until done on the calling thread, pulling pixels when a display
    /// is attached.
    Blocking { pull: FramebufferRequest },
    /// Spawn workers and return.
    Threaded { notifier: NotifyStrategy },
}

/// Fully resolved configuration for one start.
#[derive(Clone)]
pub struct ModeConfig {
    pub mode: RenderMode,
    pub view: ViewContext,
    pub persistent: bool,
    pub callbacks: Vec<EngineEvent>,
    pub drive: Drive,
    pub surface: FailureSurface,
    pub display: Option<Weak<dyn DisplayConsumer>>,
}

impl ModeConfig {
    /// Resolves the per-mode wiring for `mode`.
    pub fn resolve(mode: RenderMode, start: StartConfig, context: &BridgeContext) -> Self {
        let config = context.config();
        let mut callbacks = vec![EngineEvent::Progress, EngineEvent::RenderExit];

        let drive = if mode.is_interactive() {
            let notifier = start.notifier.unwrap_or_else(|| config.notify_strategy());
            if notifier == NotifyStrategy::Callback {
                callbacks.push(EngineEvent::Redraw);
            }
            Drive::Threaded { notifier }
        } else {
            if mode == RenderMode::Batch {
                callbacks.push(EngineEvent::ImageUpdated);
            }
            Drive::Blocking {
                pull: pull_request(&start.view),
            }
        };

        let persistent = mode == RenderMode::Batch
            && start
                .persistent
                .unwrap_or(config.session.persistent_data);

        Self {
            mode,
            view: start.view,
            persistent,
            callbacks,
            drive,
            surface: if mode.is_interactive() {
                FailureSurface::Live
            } else {
                FailureSurface::Log
            },
            display: start.display,
        }
    }

    fn display(&self) -> Option<Arc<dyn DisplayConsumer>> {
        self.display.as_ref().and_then(Weak::upgrade)
    }
}

fn pull_request(view: &ViewContext) -> FramebufferRequest {
    let request =
        FramebufferRequest::new(view.width as usize, view.height as usize).with_backfill(true);
    match view.border {
        Some(border) => request
            .with_layout(FramebufferLayout::Cropped)
            .with_border(border),
        None => request.with_layout(FramebufferLayout::Raw),
    }
}

/// One render session. Every method takes `&self` and may be called from
/// any thread.
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    context: Arc<BridgeContext>,
    state: Arc<StateCell>,
    scene: Arc<SceneSlot>,
    registry: Mutex<CallbackRegistry>,
    workers: Mutex<Vec<Worker>>,
    start_lock: Mutex<()>,
    stop_lock: Mutex<()>,
    /// Set while a start owns the scene graph but has not finished wiring
    /// it up. Cleared under `stop_lock`.
    setting_up: AtomicBool,
    stats: Arc<StatsCell>,
    progress: Arc<ProgressCell>,
    interrupt: CancellationToken,
    exit_code: Arc<Mutex<Option<i32>>>,
    image_updated: Arc<AtomicBool>,
}

impl Session {
    pub fn new(context: Arc<BridgeContext>) -> Self {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(SessionInner {
                id,
                context,
                state: Arc::new(StateCell::new()),
                scene: Arc::new(SceneSlot::new()),
                registry: Mutex::new(CallbackRegistry::new(id)),
                workers: Mutex::new(Vec::new()),
                start_lock: Mutex::new(()),
                stop_lock: Mutex::new(()),
                setting_up: AtomicBool::new(false),
                stats: Arc::new(StatsCell::new()),
                progress: Arc::new(ProgressCell::new()),
                interrupt: CancellationToken::new(),
                exit_code: Arc::new(Mutex::new(None)),
                image_updated: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    pub fn has_scene(&self) -> bool {
        self.inner.scene.get().is_some()
    }

    pub fn scene_handle(&self) -> Option<SceneHandle> {
        self.inner.scene.get()
    }

    pub fn registered_callbacks(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Latest published stats snapshot.
    pub fn stats(&self) -> Arc<RenderStats> {
        self.inner.stats.snapshot()
    }

    /// Token the host's cancel action sets to interrupt a blocking render.
    /// Cleared at the start of every render.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.inner.interrupt.clone()
    }

    pub fn start_batch(&self, config: StartConfig) -> BridgeResult<RenderOutcome> {
        self.start_mode(RenderMode::Batch, config)
    }

    /// Starts a live render (or a viewport render when `config.viewport` is
    /// set) and returns once the engine is running.
    pub fn start_interactive(&self, config: StartConfig) -> BridgeResult<RenderOutcome> {
        let mode = if config.viewport {
            RenderMode::Viewport
        } else {
            RenderMode::Live
        };
        self.start_mode(mode, config)
    }

    pub fn start_bake(&self, config: StartConfig) -> BridgeResult<RenderOutcome> {
        self.start_mode(RenderMode::Bake, config)
    }

    pub fn start_swatch(&self, config: StartConfig) -> BridgeResult<RenderOutcome> {
        self.start_mode(RenderMode::Swatch, config)
    }

    pub fn start_external(&self, config: StartConfig) -> BridgeResult<RenderOutcome> {
        self.start_mode(RenderMode::External, config)
    }

    fn start_mode(&self, mode: RenderMode, config: StartConfig) -> BridgeResult<RenderOutcome> {
        let mode_config = ModeConfig::resolve(mode, config, &self.inner.context);
        self.start(mode_config)
    }

    /// Runs the start template for a resolved mode configuration.
    ///
    /// Starts are serialized: a second start while one is in progress
    /// returns [`BridgeError::Busy`].
    pub fn start(&self, config: ModeConfig) -> BridgeResult<RenderOutcome> {
        self.inner.start(&config)
    }

    /// Forwards a host change while a live render runs. Returns `false`
    /// without doing anything otherwise.
    pub fn update_scene(&self, diff: &SceneDiff) -> BridgeResult<bool> {
        self.inner.update(diff)
    }

    /// Forwards a view change (camera, resolution) while a live render runs.
    pub fn update_view(&self, diff: &SceneDiff) -> BridgeResult<bool> {
        self.inner.update(diff)
    }

    /// Tears the session down. Idempotent and callable from any thread.
    ///
    /// Waits at most `stop_lock_timeout` for a concurrent stop; if one owns
    /// the transition this call returns [`StopOutcome::LockTimeout`] without
    /// acting. That bound is what keeps a stop issued from inside an engine
    /// callback from deadlocking against a stop that is unregistering that
    /// same callback. With `wait_for_threads`, worker joins are bounded by
    /// `join_timeout`; a worker that calls back into a locked session method
    /// from the callback being torn down will time out and be detached.
    ///
    /// A stop that lands while a start is still exporting or registering
    /// only marks the session stopping and returns [`StopOutcome::Deferred`].
    /// The scene graph is never deleted under a running export.
    pub fn stop(&self, wait_for_threads: bool) -> StopOutcome {
        self.inner.stop(wait_for_threads, false)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.inner.state.get().is_idle() {
            self.inner.stop(true, false);
        }
    }
}

impl SessionInner {
    fn start(self: &Arc<Self>, config: &ModeConfig) -> BridgeResult<RenderOutcome> {
        let Some(_start) = self.start_lock.try_lock() else {
            return Err(BridgeError::Busy(self.state.get()));
        };

        let reuse = match self.state.get() {
            SessionState::Idle => false,
            SessionState::Retained { mode } => config.persistent && mode == config.mode,
            busy => return Err(BridgeError::Busy(busy)),
        };

        if config.mode.is_interactive() && config.display().is_none() {
            return Err(BridgeError::MissingDisplay);
        }

        if let Err(failure) = self.context.preflight().run(self.context.licensing().as_ref()) {
            let err = BridgeError::from(failure);
            match config.surface {
                FailureSurface::Live => {
                    if let Some(display) = config.display() {
                        display.report(&err.to_string());
                    }
                    self.stop(false, false);
                }
                FailureSurface::Log => log::error!("{:?} render aborted: {err}", config.mode),
            }
            return Err(err);
        }

        if !reuse && !self.state.get().is_idle() {
            log::debug!("releasing retained scene graph");
            self.stop(true, false);
        }

        self.interrupt.reset();
        self.progress.set(0.0);
        *self.exit_code.lock() = None;
        self.image_updated.store(false, Ordering::Release);

        log::info!("starting {:?} render ({:?})", config.mode, self.id);
        self.setting_up.store(true, Ordering::SeqCst);
        match self.run_template(config, reuse) {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.fail_start(config, err)),
        }
    }

    fn run_template(
        self: &Arc<Self>,
        config: &ModeConfig,
        reuse: bool,
    ) -> BridgeResult<RenderOutcome> {
        let engine = self.context.engine();
        let Some(handle) = self.acquire_scene(config, reuse)? else {
            return Ok(self.cancel_setup(config));
        };
        engine.attach_stats(handle);

        if !self.export(handle, config)? {
            return Ok(self.cancel_setup(config));
        }

        {
            let mut registry = self.registry.lock();
            if self.state.holds(SessionState::is_stopping) {
                drop(registry);
                return Ok(self.cancel_setup(config));
            }
            for &event in &config.callbacks {
                registry.register(engine.as_ref(), event, self.handler(event, config)?)?;
            }
        }

        engine.render(
            handle,
            &RenderCommand {
                mode: config.mode,
                frame: config.view.frame,
            },
        )?;

        match &config.drive {
            Drive::Threaded { notifier } => {
                self.spawn_live_workers(config, *notifier)?;
                if !self.finish_setup() {
                    return Ok(self.cancel_setup(config));
                }
                log::info!("{:?} render is live", config.mode);
                Ok(RenderOutcome::Live)
            }
            Drive::Blocking { pull } => {
                if !self.finish_setup() {
                    return Ok(self.cancel_setup(config));
                }
                let outcome = self.render_blocking(config, pull);
                log::info!("{:?} render finished: {outcome:?}", config.mode);
                self.stop(true, config.persistent && outcome == RenderOutcome::Completed);
                Ok(outcome)
            }
        }
    }

    /// Step 2: create or reuse the scene graph and enter `Exporting`.
    /// `None` when a stop claimed the session first; the handle stays in the
    /// slot for the setup teardown.
    fn acquire_scene(
        &self,
        config: &ModeConfig,
        reuse: bool,
    ) -> BridgeResult<Option<SceneHandle>> {
        let engine = self.context.engine();
        let mut slot = self.scene.lock();

        let handle = match *slot {
            Some(handle) if reuse => {
                log::debug!("reusing persistent scene graph {handle:?}");
                handle
            }
            _ => {
                let handle = engine.create_scene(&SceneConfig {
                    mode: config.mode,
                    persistent: config.persistent,
                })?;
                *slot = Some(handle);
                handle
            }
        };

        match self.advance(Transition::BeginExport(config.mode)) {
            Ok(true) => Ok(Some(handle)),
            Ok(false) => Ok(None),
            Err(e) => {
                engine.delete_scene(handle);
                *slot = None;
                Err(e)
            }
        }
    }

    /// Applies a setup transition. `Ok(false)` when a stop has already
    /// marked the session stopping.
    fn advance(&self, transition: Transition) -> BridgeResult<bool> {
        match self.state.apply(transition) {
            Ok(_) => Ok(true),
            Err(_) if self.state.holds(SessionState::is_stopping) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Step 3: full export with the export-stats poller running alongside.
    /// Returns `false` when the start was stopped while exporting.
    fn export(&self, handle: SceneHandle, config: &ModeConfig) -> BridgeResult<bool> {
        let poller = StatsPoller {
            phase: StatsPhase::Export,
            state: self.state.clone(),
            running: SessionState::is_exporting,
            telemetry: self.context.telemetry().clone(),
            stats: self.stats.clone(),
            progress: self.progress.clone(),
            display: config.display.clone(),
            interval: self.context.config().stats_interval(),
        };
        let export_worker = poller.spawn("lumen-export-stats")?;

        if let Err(e) = self.context.exporter().export_full(handle, &config.view) {
            // The stop path flips the state and collects the poller.
            self.workers.lock().push(export_worker);
            return Err(e.into());
        }

        let advanced = self.advance(Transition::BeginRender).and_then(|rendering| {
            if rendering {
                self.advance(Transition::ExportFinished)
            } else {
                Ok(false)
            }
        });
        let exported = match advanced {
            Ok(exported) => exported,
            Err(e) => {
                self.workers.lock().push(export_worker);
                return Err(e);
            }
        };
        export_worker.join_timeout(self.context.config().join_timeout());
        Ok(exported && !self.state.holds(SessionState::is_stopping))
    }

    fn handler(
        self: &Arc<Self>,
        event: EngineEvent,
        config: &ModeConfig,
    ) -> BridgeResult<EngineCallback> {
        let callback: EngineCallback = match event {
            EngineEvent::Progress => {
                let progress = self.progress.clone();
                Arc::new(move |data: &EngineEventData| {
                    if let EngineEventData::Progress(value) = *data {
                        progress.set(value);
                    }
                })
            }
            EngineEvent::RenderExit => {
                let exit_code = self.exit_code.clone();
                let stop = config.mode.is_interactive().then(|| self.stop_trigger());
                Arc::new(move |data: &EngineEventData| {
                    if let EngineEventData::Exit(code) = *data {
                        if code == 0 {
                            log::info!("engine exited");
                        } else {
                            log::warn!("engine exited with code {code}");
                        }
                        *exit_code.lock() = Some(code);
                        if let Some(stop) = &stop {
                            stop();
                        }
                    }
                })
            }
            EngineEvent::ImageUpdated => {
                let image_updated = self.image_updated.clone();
                Arc::new(move |_: &EngineEventData| {
                    image_updated.store(true, Ordering::Release);
                })
            }
            EngineEvent::Redraw => {
                let display = config.display.clone().ok_or(BridgeError::MissingDisplay)?;
                notifier::redraw_callback(display, self.stop_trigger())
            }
        };
        Ok(callback)
    }

    /// Stop request that runs `stop(false)` on a fresh thread, so it is safe
    /// to fire from workers and engine callbacks.
    fn stop_trigger(self: &Arc<Self>) -> StopTrigger {
        let session = Arc::downgrade(self);
        Arc::new(move || {
            let session = session.clone();
            let spawned = thread::Builder::new()
                .name("lumen-async-stop".into())
                .spawn(move || {
                    if let Some(session) = session.upgrade() {
                        session.stop(false, false);
                    }
                });
            if let Err(e) = spawned {
                log::error!("failed to spawn stop thread: {e}");
            }
        })
    }

    fn spawn_live_workers(
        self: &Arc<Self>,
        config: &ModeConfig,
        strategy: NotifyStrategy,
    ) -> BridgeResult<()> {
        let stats = StatsPoller {
            phase: StatsPhase::Render,
            state: self.state.clone(),
            running: SessionState::is_rendering,
            telemetry: self.context.telemetry().clone(),
            stats: self.stats.clone(),
            progress: self.progress.clone(),
            display: config.display.clone(),
            interval: self.context.config().stats_interval(),
        };
        let worker = stats.spawn("lumen-stats")?;
        self.workers.lock().push(worker);

        if let NotifyStrategy::Poll { refresh } = strategy {
            let display = config.display.clone().ok_or(BridgeError::MissingDisplay)?;
            let notifier = DrawNotifier {
                state: self.state.clone(),
                engine: self.context.engine().clone(),
                scene: self.scene.clone(),
                display,
                refresh,
                on_consumer_lost: self.stop_trigger(),
            };
            let worker = notifier.spawn()?;
            self.workers.lock().push(worker);
        }
        Ok(())
    }

    /// Step 5 for blocking modes: poll until finished, exited or interrupted.
    fn render_blocking(&self, config: &ModeConfig, pull: &FramebufferRequest) -> RenderOutcome {
        let engine = self.context.engine();
        let accessor = FramebufferAccessor::new(engine.clone());
        let frame_stats = StatsPoller {
            phase: StatsPhase::Render,
            state: self.state.clone(),
            running: SessionState::is_rendering,
            telemetry: self.context.telemetry().clone(),
            stats: self.stats.clone(),
            progress: self.progress.clone(),
            display: config.display.clone(),
            interval: self.context.config().render_poll_interval(),
        };
        let interval = self.context.config().render_poll_interval();

        loop {
            {
                let slot = self.scene.lock();
                let handle = match *slot {
                    Some(handle) if self.state.holds(SessionState::is_rendering) => handle,
                    _ => return RenderOutcome::Cancelled,
                };

                if self.interrupt.is_cancelled() || engine.test_break() {
                    log::info!("{:?} render interrupted", config.mode);
                    return RenderOutcome::Cancelled;
                }

                self.progress.set(engine.progress(handle));
                let finished = engine.is_finished(handle);
                let exit_code = *self.exit_code.lock();

                let updated = self.image_updated.swap(false, Ordering::AcqRel)
                    | engine.take_buffer_updated(handle);
                if updated || finished || exit_code.is_some() {
                    self.present(&accessor, handle, config, pull);
                }

                if finished {
                    self.progress.set(1.0);
                    frame_stats.poll_once();
                    return RenderOutcome::Completed;
                }
                if let Some(code) = exit_code {
                    return RenderOutcome::EngineExit(code);
                }
            }

            frame_stats.poll_once();
            thread::sleep(interval);
        }
    }

    fn present(
        &self,
        accessor: &FramebufferAccessor,
        handle: SceneHandle,
        config: &ModeConfig,
        pull: &FramebufferRequest,
    ) {
        let Some(display) = config.display() else {
            return;
        };
        if let Some(pixels) = accessor.get(handle, pull)
            && let Err(e) = display.present(&pixels)
        {
            log::debug!("skipping pixel update: {e}");
        }
    }

    fn update(&self, diff: &SceneDiff) -> BridgeResult<bool> {
        let slot = self.scene.lock();
        if !self.state.holds(SessionState::is_live) {
            return Ok(false);
        }
        let Some(handle) = *slot else {
            return Ok(false);
        };
        self.context.exporter().export_incremental(handle, diff)?;
        Ok(true)
    }

    /// Step 6: report, tear down without waiting, hand the error back.
    fn fail_start(&self, config: &ModeConfig, err: BridgeError) -> BridgeError {
        log::error!("{:?} render failed: {err}", config.mode);
        if config.surface == FailureSurface::Live
            && let Some(display) = config.display()
        {
            display.report(&err.to_string());
        }
        self.abort_setup(false);
        err
    }

    /// Leaves the setup phase. `false` when a stop arrived during it; the
    /// caller then still owns the teardown.
    fn finish_setup(&self) -> bool {
        let _guard = self.stop_lock.lock();
        if self.state.holds(SessionState::is_stopping) {
            return false;
        }
        self.setting_up.store(false, Ordering::SeqCst);
        true
    }

    fn cancel_setup(&self, config: &ModeConfig) -> RenderOutcome {
        log::info!("{:?} render stopped during setup", config.mode);
        self.abort_setup(true);
        RenderOutcome::Cancelled
    }

    /// Tears down a start that never reached its running phase. Runs on the
    /// start thread even when another thread requested the stop.
    fn abort_setup(&self, wait_for_threads: bool) {
        let _guard = self.stop_lock.lock();
        let state = self.state.get();
        if !state.is_idle()
            && !state.is_stopping()
            && let Err(e) = self.state.apply(Transition::Terminate)
        {
            log::error!("cannot stop session: {e}");
        }
        self.teardown(wait_for_threads, None);
        self.setting_up.store(false, Ordering::SeqCst);
    }

    fn stop(&self, wait_for_threads: bool, retain: bool) -> StopOutcome {
        let config = self.context.config();
        let Some(_guard) = self.stop_lock.try_lock_for(config.stop_lock_timeout()) else {
            log::debug!("stop for {:?} already in progress", self.id);
            return StopOutcome::LockTimeout;
        };

        let state = self.state.get();
        if state.is_idle() {
            let mut registry = self.registry.lock();
            if !registry.is_empty() {
                log::warn!(
                    "releasing {} callback registration(s) left on an idle session",
                    registry.len()
                );
                registry.unregister_all(self.context.engine().as_ref());
            }
            return StopOutcome::AlreadyIdle;
        }

        // Flip first so workers and in-flight callbacks see the terminal
        // state before anything they use is torn down.
        if !state.is_stopping()
            && let Err(e) = self.state.apply(Transition::Terminate)
        {
            log::error!("cannot stop session: {e}");
            return StopOutcome::AlreadyIdle;
        }

        if self.setting_up.load(Ordering::SeqCst) {
            log::debug!("stop for {:?} handed to the start in progress", self.id);
            return StopOutcome::Deferred;
        }

        self.teardown(wait_for_threads, state.mode().filter(|_| retain));
        StopOutcome::Stopped
    }

    /// Steps (c) to (f) of a stop. The caller holds `stop_lock` and the
    /// state is already `Stopping`, or `Idle` when setup failed before the
    /// export began.
    fn teardown(&self, wait_for_threads: bool, retain: Option<RenderMode>) {
        let config = self.context.config();
        let engine = self.context.engine();
        self.registry.lock().unregister_all(engine.as_ref());

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let name = worker.name().to_string();
            let status = if wait_for_threads {
                worker.join_timeout(config.join_timeout())
            } else {
                worker.detach()
            };
            if status != JoinStatus::Joined {
                log::debug!("worker '{name}' left as {status:?}");
            }
        }

        let mut slot = self.scene.lock();
        if let Some(handle) = *slot {
            engine.stop_render(handle);
            engine.detach_stats(handle);
            if let Some(mode) = retain {
                log::debug!("retaining scene graph {handle:?} for the next frame");
                if self.state.apply(Transition::Retain(mode)).is_ok() {
                    return;
                }
            }
            engine.delete_scene(handle);
            *slot = None;
        }
        if self.state.holds(SessionState::is_stopping)
            && let Err(e) = self.state.apply(Transition::Finish)
        {
            log::error!("session stop ended in an unexpected state: {e}");
        }
        log::info!("session {:?} stopped", self.id);
    }
}
