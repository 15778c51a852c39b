use std::sync::Arc;

use corellm_engine::{InferenceEngine, LoadError, ModelDescriptor, ProgressCallback, Session};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, info};

/// A load that every interested caller can await.
///
/// Cloning does not start another load; all clones resolve to the same session.
pub type SessionFuture = Shared<BoxFuture<'static, Result<Arc<dyn Session>, LoadError>>>;

enum Slot {
    Empty,
    Pending {
        descriptor: ModelDescriptor,
        load: SessionFuture,
    },
    Resident {
        descriptor: ModelDescriptor,
        session: Arc<dyn Session>,
    },
}

/// Holds at most one loaded session, keyed by its descriptor.
///
/// Owned by the chat controller; never shared across tasks. Loading a
/// different descriptor releases the resident session first.
pub struct SessionCache {
    engine: Arc<dyn InferenceEngine>,
    cache_limit_bytes: usize,
    slot: Slot,
}

impl SessionCache {
    pub fn new(engine: Arc<dyn InferenceEngine>, cache_limit_bytes: usize) -> Self {
        Self {
            engine,
            cache_limit_bytes,
            slot: Slot::Empty,
        }
    }

    /// Get the session for `descriptor`, loading it if needed.
    ///
    /// A resident match resolves immediately and a pending match joins the
    /// in-flight load; neither calls the engine. `on_progress` is only used
    /// when a new load is started.
    pub fn get_or_load(
        &mut self,
        descriptor: &ModelDescriptor,
        on_progress: ProgressCallback,
    ) -> SessionFuture {
        self.settle();

        match &self.slot {
            Slot::Resident {
                descriptor: resident,
                session,
            } if resident == descriptor => {
                debug!("Session for '{}' is resident", descriptor.id);
                return future::ready(Ok(Arc::clone(session))).boxed().shared();
            }
            Slot::Pending {
                descriptor: pending,
                load,
            } if pending == descriptor => {
                debug!("Joining in-flight load of '{}'", descriptor.id);
                return load.clone();
            }
            _ => {}
        }

        self.invalidate();

        self.engine.set_cache_limit(self.cache_limit_bytes);
        info!(
            "Loading model '{}' (scratch limit {} bytes)",
            descriptor.id, self.cache_limit_bytes
        );

        let engine = Arc::clone(&self.engine);
        let target = descriptor.clone();
        let load = async move { engine.load(&target, on_progress).await }
            .boxed()
            .shared();

        self.slot = Slot::Pending {
            descriptor: descriptor.clone(),
            load: load.clone(),
        };
        load
    }

    /// Fold a finished pending load into the slot.
    ///
    /// Success makes the session resident; failure leaves the cache empty.
    pub fn settle(&mut self) {
        let outcome = match &self.slot {
            Slot::Pending { load, .. } => load.peek().cloned(),
            _ => None,
        };

        match (outcome, std::mem::replace(&mut self.slot, Slot::Empty)) {
            (Some(Ok(session)), Slot::Pending { descriptor, .. }) => {
                debug!("Session for '{}' is now resident", descriptor.id);
                self.slot = Slot::Resident {
                    descriptor,
                    session,
                };
            }
            (Some(Err(e)), Slot::Pending { descriptor, .. }) => {
                debug!("Dropping failed load of '{}': {}", descriptor.id, e);
            }
            (_, slot) => self.slot = slot,
        }
    }

    /// Release the resident session, or abandon the pending load.
    pub fn invalidate(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Resident { descriptor, .. } => {
                info!("Unloading model '{}'", descriptor.id);
                // Session is dropped here once no generation holds it
            }
            Slot::Pending { descriptor, .. } => {
                debug!("Abandoning pending load of '{}'", descriptor.id);
            }
            Slot::Empty => {}
        }
    }

    pub fn resident(&self) -> Option<&Arc<dyn Session>> {
        match &self.slot {
            Slot::Resident { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn is_pending(&self, descriptor: &ModelDescriptor) -> bool {
        matches!(&self.slot, Slot::Pending { descriptor: d, .. } if d == descriptor)
    }

    /// Ask the engine to drop reusable scratch buffers. The session stays resident.
    pub fn release_scratch(&self) {
        self.engine.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corellm_engine::{Script, ScriptedEngine};

    const LIMIT: usize = 20 * 1024 * 1024;

    fn descriptor(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, format!("test/{id}"))
    }

    fn no_progress() -> ProgressCallback {
        Box::new(|_| {})
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let engine = ScriptedEngine::echo();
        let gate = engine.load_gate();
        gate.close();
        let mut cache = SessionCache::new(Arc::new(engine.clone()), LIMIT);

        let first = cache.get_or_load(&descriptor("a"), no_progress());
        let second = cache.get_or_load(&descriptor("a"), no_progress());
        assert!(cache.is_pending(&descriptor("a")));

        gate.open();
        let (first, second) = tokio::join!(first, second);

        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(engine.load_calls("a"), 1);
        assert_eq!(engine.cache_limit_sets(), 1);
        assert_eq!(engine.cache_limit(), LIMIT);
    }

    #[tokio::test]
    async fn test_resident_session_needs_no_engine_call() {
        let engine = ScriptedEngine::echo();
        let mut cache = SessionCache::new(Arc::new(engine.clone()), LIMIT);

        let loaded = cache.get_or_load(&descriptor("a"), no_progress()).await.unwrap();
        let again = cache.get_or_load(&descriptor("a"), no_progress()).await.unwrap();

        assert!(Arc::ptr_eq(&loaded, &again));
        assert!(cache.resident().is_some());
        assert_eq!(engine.load_calls("a"), 1);
    }

    #[tokio::test]
    async fn test_switch_releases_previous_session() {
        let engine = ScriptedEngine::echo();
        let mut cache = SessionCache::new(Arc::new(engine.clone()), LIMIT);

        let a = cache.get_or_load(&descriptor("a"), no_progress()).await.unwrap();
        let weak_a = Arc::downgrade(&a);
        drop(a);

        let b = cache.get_or_load(&descriptor("b"), no_progress()).await.unwrap();
        assert_eq!(b.descriptor().id, "b");
        assert!(weak_a.upgrade().is_none(), "session a should be released");

        // Switching back is a new load
        cache.get_or_load(&descriptor("a"), no_progress()).await.unwrap();
        assert_eq!(engine.load_calls("a"), 2);
        assert_eq!(engine.cache_limit_sets(), 3);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_cache_empty() {
        let engine = ScriptedEngine::echo().with_script(
            "a",
            Script::default().failing_load(LoadError::ResourceExhausted("oom".into())),
        );
        let mut cache = SessionCache::new(Arc::new(engine.clone()), LIMIT);

        let result = cache.get_or_load(&descriptor("a"), no_progress()).await;
        assert!(matches!(result, Err(LoadError::ResourceExhausted(_))));

        cache.settle();
        assert!(cache.resident().is_none());
        assert!(!cache.is_pending(&descriptor("a")));

        // A retry issues a fresh engine call
        engine.set_script("a", Script::default());
        cache.get_or_load(&descriptor("a"), no_progress()).await.unwrap();
        assert_eq!(engine.load_calls("a"), 2);
    }
}
