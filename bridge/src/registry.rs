//! Callback registry.
//!
//! Records every callback a session hands to the engine dispatcher so that the
//! stop path can undo exactly those registrations, once each.

use std::collections::BTreeMap;

use crate::engine::{EngineCallback, EngineEvent, EngineSdk};
use crate::error::{BridgeError, BridgeResult};

/// Identifier of the session that owns a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// A callback currently registered with the engine.
pub struct CallbackRegistration {
    pub event: EngineEvent,
    pub handler: EngineCallback,
    pub owner: SessionId,
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Event-to-handler table mirroring what the engine holds for one session.
#[derive(Debug)]
pub struct CallbackRegistry {
    owner: SessionId,
    entries: BTreeMap<EngineEvent, CallbackRegistration>,
}

impl CallbackRegistry {
    pub fn new(owner: SessionId) -> Self {
        Self {
            owner,
            entries: BTreeMap::new(),
        }
    }

    /// Records `handler` and forwards it to the engine.
    ///
    /// An event that is still registered is rejected rather than overwritten;
    /// the engine's callback table does not support duplicate entries.
    pub fn register(
        &mut self,
        engine: &dyn EngineSdk,
        event: EngineEvent,
        handler: EngineCallback,
    ) -> BridgeResult<()> {
        if self.entries.contains_key(&event) {
            return Err(BridgeError::DuplicateCallback(event));
        }

        engine.register_callback(event, handler.clone())?;
        log::debug!("registered {:?} callback for {:?}", event, self.owner);
        self.entries.insert(
            event,
            CallbackRegistration {
                event,
                handler,
                owner: self.owner,
            },
        );
        Ok(())
    }

    /// Unregisters every recorded callback from the engine and clears the
    /// table. Returns how many were removed.
    pub fn unregister_all(&mut self, engine: &dyn EngineSdk) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        for (event, registration) in entries {
            engine.unregister_callback(event, &registration.handler);
        }
        if count > 0 {
            log::debug!("unregistered {count} callbacks for {:?}", self.owner);
        }
        count
    }

    pub fn contains(&self, event: EngineEvent) -> bool {
        self.entries.contains_key(&event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dummy::DummyEngine;
    use crate::engine::EngineEventData;

    fn noop() -> EngineCallback {
        Arc::new(|_: &EngineEventData| {})
    }

    #[test]
    fn test_register_forwards_to_engine() {
        let engine = DummyEngine::new();
        let mut registry = CallbackRegistry::new(SessionId(1));

        registry
            .register(&engine, EngineEvent::Progress, noop())
            .unwrap();
        registry
            .register(&engine, EngineEvent::RenderExit, noop())
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(engine.registered_count(), 2);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let engine = DummyEngine::new();
        let mut registry = CallbackRegistry::new(SessionId(1));

        registry
            .register(&engine, EngineEvent::Progress, noop())
            .unwrap();
        let err = registry
            .register(&engine, EngineEvent::Progress, noop())
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::DuplicateCallback(EngineEvent::Progress)
        ));
        assert_eq!(engine.registered_count(), 1);
    }

    #[test]
    fn test_unregister_all_is_symmetric() {
        let engine = DummyEngine::new();
        let mut registry = CallbackRegistry::new(SessionId(7));

        for _ in 0..3 {
            registry
                .register(&engine, EngineEvent::Progress, noop())
                .unwrap();
            registry
                .register(&engine, EngineEvent::Redraw, noop())
                .unwrap();
            assert_eq!(registry.unregister_all(&engine), 2);
            assert!(registry.is_empty());
            assert_eq!(engine.registered_count(), 0);
        }

        assert_eq!(registry.unregister_all(&engine), 0);
    }
}
