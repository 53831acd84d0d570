//! Explicit owner of the collaborators a session talks to.
//!
//! The host creates one [`BridgeContext`] when it loads the bridge and calls
//! [`BridgeContext::shutdown`] when it unloads it. Sessions borrow it through
//! an `Arc`; nothing is constructed lazily on first use.

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::engine::{EngineSdk, Licensing, SceneExporter, TelemetryBackend};
use crate::error::BridgeResult;
use crate::preflight::PreflightChecker;
use crate::session::Session;

/// External collaborators handed to [`BridgeContext::init`].
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn EngineSdk>,
    pub exporter: Arc<dyn SceneExporter>,
    pub telemetry: Arc<dyn TelemetryBackend>,
    pub licensing: Arc<dyn Licensing>,
}

pub struct BridgeContext {
    collaborators: Collaborators,
    config: BridgeConfig,
    preflight: PreflightChecker,
}

impl BridgeContext {
    /// Builds the context and connects telemetry.
    ///
    /// An unreachable telemetry backend is not fatal: stats are reported as
    /// unavailable until [`reconnect_telemetry`](Self::reconnect_telemetry)
    /// succeeds.
    pub fn init(collaborators: Collaborators, config: BridgeConfig) -> Arc<Self> {
        if let Err(e) = collaborators.telemetry.connect() {
            log::warn!("Telemetry unavailable: {e}");
        }

        let preflight = PreflightChecker::standard(
            config.license.required_feature.clone(),
            config.renderer_variant(),
        );
        log::info!(
            "Lumen bridge v{} initialized ({:?} renderer)",
            crate::VERSION,
            config.renderer_variant()
        );

        Arc::new(Self {
            collaborators,
            config,
            preflight,
        })
    }

    /// Disconnects telemetry. Sessions must be stopped first.
    pub fn shutdown(&self) {
        self.collaborators.telemetry.disconnect();
        log::info!("Lumen bridge shut down");
    }

    pub fn reconnect_telemetry(&self) -> BridgeResult<()> {
        self.collaborators.telemetry.connect()?;
        Ok(())
    }

    pub fn telemetry_available(&self) -> bool {
        self.collaborators.telemetry.is_connected()
    }

    pub fn new_session(self: &Arc<Self>) -> Session {
        Session::new(self.clone())
    }

    pub fn engine(&self) -> &Arc<dyn EngineSdk> {
        &self.collaborators.engine
    }

    pub fn exporter(&self) -> &Arc<dyn SceneExporter> {
        &self.collaborators.exporter
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryBackend> {
        &self.collaborators.telemetry
    }

    pub fn licensing(&self) -> &Arc<dyn Licensing> {
        &self.collaborators.licensing
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn preflight(&self) -> &PreflightChecker {
        &self.preflight
    }
}
