//! Dummy collaborators for testing and development.
//!
//! None of these talk to a real engine, host or license server. They keep
//! just enough state to drive a session through every path: scenes that
//! finish after a number of progress polls, a live engine thread that fires
//! callbacks, an exporter and a license service that can be told to fail.
//! Counters let tests check what the session actually did.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::Collaborators;
use crate::engine::{
    DisplayConsumer, DisplayGone, EngineCallback, EngineError, EngineEvent, EngineEventData,
    EngineSdk, Licensing, RenderCommand, RendererVariant, SceneConfig, SceneDiff, SceneExporter,
    SceneHandle, TelemetryBackend, ViewContext,
};
use crate::error::{ExportError, TelemetryError};
use crate::framebuffer::{FramebufferPixels, RawFramebuffer};
use crate::stats::{RenderStats, StatsPhase, TelemetrySnapshot};

type CallbackTable = Arc<Mutex<BTreeMap<EngineEvent, EngineCallback>>>;

/// Behavior knobs for [`DummyEngine`].
#[derive(Debug, Clone)]
pub struct DummyEngineSettings {
    /// Progress added on each `progress()` poll of a blocking render.
    pub progress_step: f32,
    /// Blocking renders exit with this code at half progress instead of
    /// finishing.
    pub exit_midway: Option<i32>,
    /// Tick period of the live engine thread.
    pub live_tick: Duration,
    /// Live renders exit on their own after this many ticks.
    pub live_exit_after: Option<u32>,
    pub framebuffer_width: usize,
    pub framebuffer_height: usize,
    pub framebuffer_channels: usize,
    pub framebuffer_value: f32,
    pub fail_create: bool,
    pub fail_render: bool,
}

impl Default for DummyEngineSettings {
    fn default() -> Self {
        Self {
            progress_step: 0.25,
            exit_midway: None,
            live_tick: Duration::from_millis(2),
            live_exit_after: None,
            framebuffer_width: 32,
            framebuffer_height: 32,
            framebuffer_channels: 4,
            framebuffer_value: 0.5,
            fail_create: false,
            fail_render: false,
        }
    }
}

#[derive(Debug, Default)]
struct SceneFlags {
    progress: AtomicU32,
    rendering: AtomicBool,
    finished: AtomicBool,
    exited: AtomicBool,
    buffer_updated: AtomicBool,
    stats_attached: AtomicBool,
}

impl SceneFlags {
    fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    fn set_progress(&self, value: f32) {
        self.progress
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }
}

#[derive(Debug)]
struct DummyScene {
    config: SceneConfig,
    flags: Arc<SceneFlags>,
}

/// In-process engine stand-in.
///
/// Callbacks are invoked without holding any engine lock, like the native
/// dispatcher does from its worker threads.
pub struct DummyEngine {
    settings: Mutex<DummyEngineSettings>,
    next_handle: AtomicU64,
    scenes: Mutex<HashMap<SceneHandle, DummyScene>>,
    callbacks: CallbackTable,
    break_requested: AtomicBool,
    created: AtomicUsize,
    deleted: AtomicUsize,
    stop_requests: AtomicUsize,
    renders: AtomicUsize,
    stale_accesses: AtomicUsize,
}

impl DummyEngine {
    pub fn new() -> Self {
        Self::with_settings(DummyEngineSettings::default())
    }

    pub fn with_settings(settings: DummyEngineSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            next_handle: AtomicU64::new(1),
            scenes: Mutex::new(HashMap::new()),
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
            break_requested: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            stop_requests: AtomicUsize::new(0),
            renders: AtomicUsize::new(0),
            stale_accesses: AtomicUsize::new(0),
        }
    }

    /// Changes the behavior of scenes created or rendered from now on.
    pub fn configure(&self, update: impl FnOnce(&mut DummyEngineSettings)) {
        update(&mut self.settings.lock());
    }

    pub fn registered_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_registered(&self, event: EngineEvent) -> bool {
        self.callbacks.lock().contains_key(&event)
    }

    pub fn created_scenes(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted_scenes(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn live_scenes(&self) -> usize {
        self.scenes.lock().len()
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn render_requests(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Calls that named a handle that was never created or already deleted.
    pub fn stale_accesses(&self) -> usize {
        self.stale_accesses.load(Ordering::SeqCst)
    }

    pub fn stats_attached(&self, handle: SceneHandle) -> bool {
        self.flags(handle)
            .is_some_and(|flags| flags.stats_attached.load(Ordering::Acquire))
    }

    /// Simulates the host's break key.
    pub fn request_break(&self, requested: bool) {
        self.break_requested.store(requested, Ordering::Release);
    }

    pub fn mark_buffer_updated(&self, handle: SceneHandle) {
        if let Some(flags) = self.flags(handle) {
            flags.buffer_updated.store(true, Ordering::Release);
        }
    }

    /// Invokes the registered callback for `data`, as the engine would.
    pub fn emit(&self, data: &EngineEventData) {
        emit(&self.callbacks, data);
    }

    fn flags(&self, handle: SceneHandle) -> Option<Arc<SceneFlags>> {
        let flags = self
            .scenes
            .lock()
            .get(&handle)
            .map(|scene| scene.flags.clone());
        if flags.is_none() {
            self.stale_accesses.fetch_add(1, Ordering::SeqCst);
            log::warn!("DummyEngine: access to unknown scene {handle:?}");
        }
        flags
    }

    fn spawn_live(&self, handle: SceneHandle, flags: Arc<SceneFlags>) {
        let (tick, exit_after) = {
            let settings = self.settings.lock();
            (settings.live_tick, settings.live_exit_after)
        };
        let callbacks = self.callbacks.clone();

        let spawned = thread::Builder::new()
            .name(format!("dummy-engine-{}", handle.0))
            .spawn(move || {
                let mut ticks = 0u32;
                while flags.rendering.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    if !flags.rendering.load(Ordering::Acquire) {
                        break;
                    }
                    ticks += 1;
                    let progress = (flags.progress() + 0.01).min(1.0);
                    flags.set_progress(progress);
                    flags.buffer_updated.store(true, Ordering::Release);
                    emit(&callbacks, &EngineEventData::Progress(progress));
                    emit(&callbacks, &EngineEventData::Redraw);

                    if exit_after.is_some_and(|limit| ticks >= limit) {
                        flags.rendering.store(false, Ordering::Release);
                        flags.exited.store(true, Ordering::Release);
                        emit(&callbacks, &EngineEventData::Exit(0));
                    }
                }
                log::trace!("DummyEngine: live thread for {handle:?} finished");
            });
        if let Err(e) = spawned {
            log::error!("DummyEngine: failed to spawn live thread: {e}");
        }
    }
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(callbacks: &CallbackTable, data: &EngineEventData) {
    let callback = callbacks.lock().get(&data.event()).cloned();
    if let Some(callback) = callback {
        callback(data);
    }
}

impl EngineSdk for DummyEngine {
    fn create_scene(&self, config: &SceneConfig) -> Result<SceneHandle, EngineError> {
        if self.settings.lock().fail_create {
            return Err(EngineError::SceneCreationFailed("dummy failure".into()));
        }
        let handle = SceneHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        log::trace!("DummyEngine: creating scene {handle:?} ({:?})", config.mode);
        self.scenes.lock().insert(
            handle,
            DummyScene {
                config: config.clone(),
                flags: Arc::new(SceneFlags::default()),
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn delete_scene(&self, handle: SceneHandle) {
        match self.scenes.lock().remove(&handle) {
            Some(scene) => {
                scene.flags.rendering.store(false, Ordering::Release);
                self.deleted.fetch_add(1, Ordering::SeqCst);
                log::trace!("DummyEngine: deleted scene {handle:?}");
            }
            None => {
                self.stale_accesses.fetch_add(1, Ordering::SeqCst);
                log::warn!("DummyEngine: double delete of {handle:?}");
            }
        }
    }

    fn render(&self, handle: SceneHandle, command: &RenderCommand) -> Result<(), EngineError> {
        if self.settings.lock().fail_render {
            return Err(EngineError::RenderFailed("dummy failure".into()));
        }
        let flags = {
            let scenes = self.scenes.lock();
            let scene = scenes.get(&handle).ok_or(EngineError::UnknownScene(handle))?;
            log::trace!(
                "DummyEngine: rendering {handle:?} as {:?} (persistent: {})",
                command.mode,
                scene.config.persistent
            );
            scene.flags.clone()
        };
        self.renders.fetch_add(1, Ordering::SeqCst);

        flags.set_progress(0.0);
        flags.finished.store(false, Ordering::Release);
        flags.exited.store(false, Ordering::Release);
        flags.rendering.store(true, Ordering::Release);

        if command.mode.is_interactive() {
            self.spawn_live(handle, flags);
        }
        Ok(())
    }

    fn stop_render(&self, handle: SceneHandle) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(flags) = self.flags(handle) {
            // The live thread notices on its next tick; never joined here,
            // stop may be running on a thread the engine called into.
            flags.rendering.store(false, Ordering::Release);
        }
    }

    fn register_callback(
        &self,
        event: EngineEvent,
        callback: EngineCallback,
    ) -> Result<(), EngineError> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.contains_key(&event) {
            return Err(EngineError::CallbackRejected(event));
        }
        callbacks.insert(event, callback);
        Ok(())
    }

    fn unregister_callback(&self, event: EngineEvent, callback: &EngineCallback) {
        let mut callbacks = self.callbacks.lock();
        if callbacks
            .get(&event)
            .is_some_and(|registered| Arc::ptr_eq(registered, callback))
        {
            callbacks.remove(&event);
        }
    }

    fn test_break(&self) -> bool {
        self.break_requested.load(Ordering::Acquire)
    }

    fn progress(&self, handle: SceneHandle) -> f32 {
        let Some(flags) = self.flags(handle) else {
            return 0.0;
        };
        if !flags.rendering.load(Ordering::Acquire) {
            return flags.progress();
        }

        let (step, exit_midway) = {
            let settings = self.settings.lock();
            (settings.progress_step, settings.exit_midway)
        };
        let before = flags.progress();
        let after = (before + step).min(1.0);

        if let Some(code) = exit_midway
            && after >= 0.5
        {
            flags.rendering.store(false, Ordering::Release);
            flags.exited.store(true, Ordering::Release);
            self.emit(&EngineEventData::Exit(code));
            return before;
        }

        flags.set_progress(after);
        flags.buffer_updated.store(true, Ordering::Release);
        self.emit(&EngineEventData::Progress(after));
        self.emit(&EngineEventData::ImageUpdated);

        if after >= 1.0 {
            flags.rendering.store(false, Ordering::Release);
            flags.finished.store(true, Ordering::Release);
            self.emit(&EngineEventData::Exit(0));
        }
        after
    }

    fn is_finished(&self, handle: SceneHandle) -> bool {
        self.flags(handle)
            .is_some_and(|flags| flags.finished.load(Ordering::Acquire))
    }

    fn take_buffer_updated(&self, handle: SceneHandle) -> bool {
        self.flags(handle)
            .is_some_and(|flags| flags.buffer_updated.swap(false, Ordering::AcqRel))
    }

    fn read_framebuffer(&self, handle: SceneHandle, image_index: usize) -> Option<RawFramebuffer> {
        let flags = self.flags(handle)?;
        if image_index != 0 || flags.progress() <= 0.0 {
            return None;
        }
        let settings = self.settings.lock();
        Some(RawFramebuffer::filled(
            settings.framebuffer_width,
            settings.framebuffer_height,
            settings.framebuffer_channels,
            settings.framebuffer_value,
        ))
    }

    fn channel_count(&self, handle: SceneHandle, image_index: usize) -> Option<usize> {
        self.flags(handle)?;
        (image_index == 0).then(|| self.settings.lock().framebuffer_channels)
    }

    fn attach_stats(&self, handle: SceneHandle) {
        if let Some(flags) = self.flags(handle) {
            flags.stats_attached.store(true, Ordering::Release);
        }
    }

    fn detach_stats(&self, handle: SceneHandle) {
        if let Some(flags) = self.flags(handle) {
            flags.stats_attached.store(false, Ordering::Release);
        }
    }
}

/// Exporter that records what it was asked to do.
#[derive(Debug, Default)]
pub struct DummyExporter {
    full: AtomicUsize,
    incremental: AtomicUsize,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    last_view: Mutex<Option<ViewContext>>,
    diffs: Mutex<Vec<SceneDiff>>,
}

impl DummyExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every export fail with `message` until cleared.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Makes full exports take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn full_exports(&self) -> usize {
        self.full.load(Ordering::SeqCst)
    }

    pub fn incremental_exports(&self) -> usize {
        self.incremental.load(Ordering::SeqCst)
    }

    pub fn last_view(&self) -> Option<ViewContext> {
        self.last_view.lock().clone()
    }

    pub fn diffs(&self) -> Vec<SceneDiff> {
        self.diffs.lock().clone()
    }

    fn check_failure(&self) -> Result<(), ExportError> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(ExportError(message.clone())),
            None => Ok(()),
        }
    }
}

impl SceneExporter for DummyExporter {
    fn export_full(&self, _handle: SceneHandle, view: &ViewContext) -> Result<(), ExportError> {
        self.full.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.check_failure()?;
        *self.last_view.lock() = Some(view.clone());
        Ok(())
    }

    fn export_incremental(
        &self,
        _handle: SceneHandle,
        diff: &SceneDiff,
    ) -> Result<(), ExportError> {
        self.incremental.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.diffs.lock().push(diff.clone());
        Ok(())
    }
}

/// Display consumer that counts what it received. [`close`](Self::close)
/// makes it behave like a window that was torn down while still referenced.
#[derive(Debug, Default)]
pub struct DummyDisplay {
    closed: AtomicBool,
    redraws: AtomicUsize,
    presents: AtomicUsize,
    stats_refreshes: AtomicUsize,
    last_pixels: Mutex<Option<FramebufferPixels>>,
    last_stats: Mutex<Option<RenderStats>>,
    reports: Mutex<Vec<String>>,
}

impl DummyDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn redraws(&self) -> usize {
        self.redraws.load(Ordering::SeqCst)
    }

    pub fn presents(&self) -> usize {
        self.presents.load(Ordering::SeqCst)
    }

    pub fn stats_refreshes(&self) -> usize {
        self.stats_refreshes.load(Ordering::SeqCst)
    }

    pub fn last_pixels(&self) -> Option<FramebufferPixels> {
        self.last_pixels.lock().clone()
    }

    pub fn last_stats(&self) -> Option<RenderStats> {
        *self.last_stats.lock()
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }

    fn check_open(&self) -> Result<(), DisplayGone> {
        if self.closed.load(Ordering::Acquire) {
            Err(DisplayGone)
        } else {
            Ok(())
        }
    }
}

impl DisplayConsumer for DummyDisplay {
    fn request_redraw(&self) -> Result<(), DisplayGone> {
        self.check_open()?;
        self.redraws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn present(&self, pixels: &FramebufferPixels) -> Result<(), DisplayGone> {
        self.check_open()?;
        self.presents.fetch_add(1, Ordering::SeqCst);
        *self.last_pixels.lock() = Some(pixels.clone());
        Ok(())
    }

    fn refresh_stats(&self, stats: &RenderStats) -> Result<(), DisplayGone> {
        self.check_open()?;
        self.stats_refreshes.fetch_add(1, Ordering::SeqCst);
        *self.last_stats.lock() = Some(*stats);
        Ok(())
    }

    fn report(&self, message: &str) {
        self.reports.lock().push(message.to_string());
    }
}

/// Telemetry backend that starts disconnected.
#[derive(Debug)]
pub struct DummyTelemetry {
    connected: AtomicBool,
    unreachable: AtomicBool,
    snapshots: AtomicU32,
    export_delay: Mutex<Duration>,
    started: Instant,
}

impl DummyTelemetry {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            snapshots: AtomicU32::new(0),
            export_delay: Mutex::new(Duration::ZERO),
            started: Instant::now(),
        }
    }

    /// Makes export-phase snapshots take at least `delay`, which holds the
    /// export-stats poller (and the join on it) for that long.
    pub fn set_export_snapshot_delay(&self, delay: Duration) {
        *self.export_delay.lock() = delay;
    }

    /// Makes `connect` fail and drops an existing connection.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
        if unreachable {
            self.connected.store(false, Ordering::Release);
        }
    }

    pub fn snapshots_taken(&self) -> u32 {
        self.snapshots.load(Ordering::SeqCst)
    }
}

impl Default for DummyTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBackend for DummyTelemetry {
    fn connect(&self) -> Result<(), TelemetryError> {
        if self.unreachable.load(Ordering::Acquire) {
            return Err(TelemetryError::Unreachable("dummy endpoint".into()));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn snapshot(&self, phase: StatsPhase) -> Result<TelemetrySnapshot, TelemetryError> {
        if !self.is_connected() {
            return Err(TelemetryError::Disconnected);
        }
        let count = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.export_delay.lock();
        if phase == StatsPhase::Export && !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(TelemetrySnapshot {
            samples: match phase {
                StatsPhase::Export => 0,
                StatsPhase::Render => count,
            },
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            memory_mb: 64.0,
        })
    }
}

#[derive(Debug, Clone)]
struct LicenseState {
    valid: bool,
    feature: bool,
    variant: bool,
    expiry: Option<i64>,
}

/// License service that grants everything unless told otherwise. Records
/// the order of the checks it answered.
#[derive(Debug)]
pub struct DummyLicensing {
    state: Mutex<LicenseState>,
    calls: Mutex<Vec<&'static str>>,
}

impl DummyLicensing {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LicenseState {
                valid: true,
                feature: true,
                variant: true,
                expiry: Some(30),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_license_valid(&self, valid: bool) {
        self.state.lock().valid = valid;
    }

    pub fn set_feature_entitled(&self, entitled: bool) {
        self.state.lock().feature = entitled;
    }

    pub fn set_variant_available(&self, available: bool) {
        self.state.lock().variant = available;
    }

    pub fn set_license_expiry(&self, days: Option<i64>) {
        self.state.lock().expiry = days;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &'static str) -> LicenseState {
        self.calls.lock().push(call);
        self.state.lock().clone()
    }
}

impl Default for DummyLicensing {
    fn default() -> Self {
        Self::new()
    }
}

impl Licensing for DummyLicensing {
    fn license_valid(&self) -> bool {
        self.record("license").valid
    }

    fn feature_entitled(&self, _feature: &str) -> bool {
        self.record("feature").feature
    }

    fn variant_available(&self, _variant: RendererVariant) -> bool {
        self.record("variant").variant
    }

    fn days_until_expiry(&self) -> Option<i64> {
        self.record("expiry").expiry
    }
}

/// All dummy collaborators, kept concrete so tests can inspect them.
#[derive(Clone)]
pub struct DummyStack {
    pub engine: Arc<DummyEngine>,
    pub exporter: Arc<DummyExporter>,
    pub telemetry: Arc<DummyTelemetry>,
    pub licensing: Arc<DummyLicensing>,
}

impl DummyStack {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(DummyEngine::new()),
            exporter: Arc::new(DummyExporter::new()),
            telemetry: Arc::new(DummyTelemetry::new()),
            licensing: Arc::new(DummyLicensing::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.engine.clone(),
            exporter: self.exporter.clone(),
            telemetry: self.telemetry.clone(),
            licensing: self.licensing.clone(),
        }
    }
}

impl Default for DummyStack {
    fn default() -> Self {
        Self::new()
    }
}
