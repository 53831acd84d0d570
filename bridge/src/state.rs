//! Session state machine.
//!
//! The session is always in exactly one [`SessionState`]. All changes go
//! through [`SessionState::apply`], which consults the transition table and
//! rejects anything it does not list.

use parking_lot::RwLock;

use crate::engine::RenderMode;
use crate::error::{BridgeError, BridgeResult};

/// Tagged session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No scene graph exists.
    #[default]
    Idle,
    /// The exporter is populating a fresh or reused scene graph.
    Exporting { mode: RenderMode },
    /// The engine is rendering. `exporting` stays set from the render
    /// command until the export phase is closed, which is the window in
    /// which both are observed at once.
    Rendering { mode: RenderMode, exporting: bool },
    /// A persistent-data scene graph is kept between frames.
    Retained { mode: RenderMode },
    /// Terminal value flipped first by `stop`; workers exit on seeing it.
    Stopping,
}

/// Requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BeginExport(RenderMode),
    BeginRender,
    ExportFinished,
    Terminate,
    Retain(RenderMode),
    Finish,
}

impl SessionState {
    /// Looks up `transition` in the transition table.
    pub fn apply(self, transition: Transition) -> BridgeResult<SessionState> {
        use SessionState::*;
        use Transition::*;

        let next = match (self, transition) {
            (Idle, BeginExport(mode)) => Some(Exporting { mode }),
            (Retained { .. }, BeginExport(mode)) => Some(Exporting { mode }),
            (Exporting { mode }, BeginRender) => Some(Rendering {
                mode,
                exporting: true,
            }),
            (
                Rendering {
                    mode,
                    exporting: true,
                },
                ExportFinished,
            ) => Some(Rendering {
                mode,
                exporting: false,
            }),
            (Exporting { .. } | Rendering { .. } | Retained { .. }, Terminate) => Some(Stopping),
            (Stopping, Retain(mode)) => Some(Retained { mode }),
            (Stopping, Finish) => Some(Idle),
            _ => None,
        };

        next.ok_or(BridgeError::InvalidTransition {
            from: self,
            transition,
        })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True while the exporter may still be running.
    pub fn is_exporting(&self) -> bool {
        matches!(
            self,
            Self::Exporting { .. }
                | Self::Rendering {
                    exporting: true,
                    ..
                }
        )
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self, Self::Rendering { .. })
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping)
    }

    /// Interactive render (live window or viewport) in progress.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Rendering {
                mode: RenderMode::Live | RenderMode::Viewport,
                ..
            }
        )
    }

    pub fn is_viewport(&self) -> bool {
        matches!(
            self,
            Self::Rendering {
                mode: RenderMode::Viewport,
                ..
            }
        )
    }

    pub fn is_swatch(&self) -> bool {
        matches!(
            self,
            Self::Rendering {
                mode: RenderMode::Swatch,
                ..
            }
        )
    }

    pub fn mode(&self) -> Option<RenderMode> {
        match *self {
            Self::Exporting { mode } | Self::Rendering { mode, .. } | Self::Retained { mode } => {
                Some(mode)
            }
            Self::Idle | Self::Stopping => None,
        }
    }
}

/// Shared, read-mostly holder of the session state.
///
/// Only the session writes; worker threads and engine callbacks read.
#[derive(Debug, Default)]
pub struct StateCell {
    inner: RwLock<SessionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionState {
        *self.inner.read()
    }

    pub fn holds(&self, predicate: fn(&SessionState) -> bool) -> bool {
        predicate(&self.inner.read())
    }

    /// Applies `transition` atomically and returns the new state.
    pub(crate) fn apply(&self, transition: Transition) -> BridgeResult<SessionState> {
        let mut state = self.inner.write();
        let next = state.apply(transition)?;
        log::debug!("session state {:?} -> {:?}", *state, next);
        *state = next;
        Ok(next)
    }
}
