//! Collaborator interfaces
//!
//! These traits describe everything the session needs from the outside world:
//! the native engine SDK, the scene exporter, the display that shows pixels,
//! the telemetry backend and the license service. The session treats all of
//! them as opaque beyond success/failure.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ExportError, TelemetryError};
use crate::framebuffer::{Border, FramebufferPixels, RawFramebuffer};
use crate::stats::{RenderStats, StatsPhase, TelemetrySnapshot};

/// Opaque scene graph handle owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

/// Render mode a session is started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Final frame render, blocking.
    Batch,
    /// Texture bake, blocking.
    Bake,
    /// Material preview swatch, blocking.
    Swatch,
    /// Render driven by an external display driver, blocking.
    External,
    /// Interactive render in a dedicated render window.
    Live,
    /// Interactive render inside the editor viewport.
    Viewport,
}

impl RenderMode {
    /// Whether the start call returns while the engine keeps rendering.
    pub fn is_interactive(self) -> bool {
        matches!(self, Self::Live | Self::Viewport)
    }
}

/// Events the engine dispatcher can call back for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineEvent {
    Progress,
    RenderExit,
    ImageUpdated,
    Redraw,
}

/// Payload delivered to a registered callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEventData {
    /// Progress in `[0, 1]`.
    Progress(f32),
    /// The engine finished or terminated with this exit code.
    Exit(i32),
    ImageUpdated,
    Redraw,
}

impl EngineEventData {
    pub fn event(&self) -> EngineEvent {
        match self {
            Self::Progress(_) => EngineEvent::Progress,
            Self::Exit(_) => EngineEvent::RenderExit,
            Self::ImageUpdated => EngineEvent::ImageUpdated,
            Self::Redraw => EngineEvent::Redraw,
        }
    }
}

/// Handler invoked by the engine, possibly on its own thread.
///
/// Implementations must be reentrant and must not block on anything the
/// engine thread may hold.
pub type EngineCallback = Arc<dyn Fn(&EngineEventData) + Send + Sync>;

/// Parameters for creating a scene graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub mode: RenderMode,
    /// Keep the scene alive across frames.
    pub persistent: bool,
}

/// Render command issued against a populated scene.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCommand {
    pub mode: RenderMode,
    pub frame: i32,
}

/// Host view the exporter reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewContext {
    pub width: u32,
    pub height: u32,
    pub frame: i32,
    pub camera: Option<String>,
    pub border: Option<Border>,
}

impl Default for ViewContext {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame: 1,
            camera: None,
            border: None,
        }
    }
}

/// Which part of the host changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Scene,
    View,
}

/// Incremental host change forwarded to the exporter during live renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDiff {
    pub kind: DiffKind,
    /// Names of changed host objects.
    pub changed: Vec<String>,
}

impl SceneDiff {
    pub fn scene(changed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: DiffKind::Scene,
            changed: changed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn view() -> Self {
        Self {
            kind: DiffKind::View,
            changed: Vec::new(),
        }
    }
}

/// Errors from the engine SDK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("failed to create scene: {0}")]
    SceneCreationFailed(String),
    #[error("render command rejected: {0}")]
    RenderFailed(String),
    #[error("callback table already holds an entry for {0:?}")]
    CallbackRejected(EngineEvent),
    #[error("unknown scene handle {0:?}")]
    UnknownScene(SceneHandle),
}

/// The native rendering engine.
pub trait EngineSdk: Send + Sync {
    fn create_scene(&self, config: &SceneConfig) -> Result<SceneHandle, EngineError>;

    /// Not thread-safe in the native SDK; the session serializes it against
    /// every other handle access.
    fn delete_scene(&self, handle: SceneHandle);

    fn render(&self, handle: SceneHandle, command: &RenderCommand) -> Result<(), EngineError>;

    /// Ask the engine to stop rendering `handle`.
    fn stop_render(&self, handle: SceneHandle);

    fn register_callback(
        &self,
        event: EngineEvent,
        callback: EngineCallback,
    ) -> Result<(), EngineError>;

    fn unregister_callback(&self, event: EngineEvent, callback: &EngineCallback);

    /// Host-level break request (e.g. Esc held in the editor).
    fn test_break(&self) -> bool;

    /// Render progress in `[0, 1]`.
    fn progress(&self, handle: SceneHandle) -> f32;

    fn is_finished(&self, handle: SceneHandle) -> bool;

    /// Returns and clears the "buffer updated" flag.
    fn take_buffer_updated(&self, handle: SceneHandle) -> bool;

    /// Current pixel buffer, or `None` when not ready yet.
    fn read_framebuffer(&self, handle: SceneHandle, image_index: usize) -> Option<RawFramebuffer>;

    /// Channel count of an output, when the engine knows it.
    fn channel_count(&self, handle: SceneHandle, image_index: usize) -> Option<usize>;

    fn attach_stats(&self, handle: SceneHandle);

    fn detach_stats(&self, handle: SceneHandle);
}

/// Translates host state into engine scene commands.
pub trait SceneExporter: Send + Sync {
    fn export_full(&self, handle: SceneHandle, view: &ViewContext) -> Result<(), ExportError>;

    fn export_incremental(&self, handle: SceneHandle, diff: &SceneDiff)
    -> Result<(), ExportError>;
}

/// The display consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGone;

impl fmt::Display for DisplayGone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("display consumer no longer exists")
    }
}

impl std::error::Error for DisplayGone {}

/// Receives redraw notifications and pixels. May disappear at any time, so
/// the session only holds it weakly.
pub trait DisplayConsumer: Send + Sync {
    fn request_redraw(&self) -> Result<(), DisplayGone>;

    fn present(&self, pixels: &FramebufferPixels) -> Result<(), DisplayGone>;

    fn refresh_stats(&self, stats: &RenderStats) -> Result<(), DisplayGone>;

    /// Show a status message (e.g. a preflight failure) in the live UI.
    fn report(&self, message: &str);
}

/// Metrics service with its own connect/disconnect lifecycle.
pub trait TelemetryBackend: Send + Sync {
    fn connect(&self) -> Result<(), TelemetryError>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn snapshot(&self, phase: StatsPhase) -> Result<TelemetrySnapshot, TelemetryError>;
}

/// Renderer variant gated by the license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererVariant {
    Cpu,
    Gpu,
    Xpu,
}

impl RendererVariant {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "gpu" => Some(Self::Gpu),
            "xpu" => Some(Self::Xpu),
            _ => None,
        }
    }
}

/// License and entitlement service.
pub trait Licensing: Send + Sync {
    fn license_valid(&self) -> bool;

    fn feature_entitled(&self, feature: &str) -> bool;

    fn variant_available(&self, variant: RendererVariant) -> bool;

    /// Days until the license expires; negative once expired, `None` for
    /// perpetual licenses.
    fn days_until_expiry(&self) -> Option<i64>;
}
