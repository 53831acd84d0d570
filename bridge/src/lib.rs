//! # Lumen Bridge
//!
//! Render session orchestrator sitting between a host editor and an external
//! rendering engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Session`] - Start/stop lifecycle of one render, with a single start
//!   template shared by every [`RenderMode`]
//! - [`CallbackRegistry`] - Engine callback bookkeeping per session
//! - [`StatsPoller`] and [`DrawNotifier`] - Session-owned background workers
//! - [`FramebufferAccessor`] - Engine pixels converted for a display consumer
//! - [`PreflightChecker`] - License and capability checks before any work
//! - [`dummy`] - In-process collaborators for testing and development
//!
//! ## Example
//!
//! ```ignore
//! use lumen_bridge::{BridgeConfig, BridgeContext, StartConfig};
//! use lumen_bridge::dummy::DummyStack;
//!
//! let stack = DummyStack::new();
//! let context = BridgeContext::init(stack.collaborators(), BridgeConfig::default());
//! let session = context.new_session();
//! let outcome = session.start_batch(StartConfig::default())?;
//! ```

pub mod cancellation;
pub mod config;
pub mod context;
#[cfg(feature = "dummy")]
pub mod dummy;
pub mod engine;
pub mod error;
pub mod framebuffer;
pub mod notifier;
pub mod preflight;
pub mod registry;
pub mod session;
pub mod state;
pub mod stats;
pub mod worker;

// Re-export main types for convenience
pub use cancellation::CancellationToken;
pub use config::{BridgeConfig, load_config, load_or_default};
pub use context::{BridgeContext, Collaborators};
pub use engine::{
    DisplayConsumer, DisplayGone, EngineCallback, EngineError, EngineEvent, EngineEventData,
    EngineSdk, Licensing, RenderMode, RendererVariant, SceneDiff, SceneExporter, SceneHandle,
    TelemetryBackend, ViewContext,
};
pub use error::{BridgeError, BridgeResult, ExportError, TelemetryError};
pub use framebuffer::{
    Border, FramebufferAccessor, FramebufferLayout, FramebufferPixels, FramebufferRequest,
    RawFramebuffer,
};
pub use notifier::{DrawNotifier, NotifyStrategy};
pub use preflight::{FailureSurface, PreflightCheck, PreflightChecker, PreflightFailure};
pub use registry::{CallbackRegistry, SessionId};
pub use session::{ModeConfig, RenderOutcome, Session, StartConfig, StopOutcome};
pub use state::{SessionState, Transition};
pub use stats::{RenderStats, StatsPhase, StatsPoller, StatsStatus};

/// Bridge library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs the bridge version. Hosts call this once after installing their
/// logger.
pub fn init() {
    log::info!("Lumen bridge v{} loaded", VERSION);
}
