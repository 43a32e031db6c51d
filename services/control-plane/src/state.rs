//! Application state shared across request handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::store::ResourceStore;
use crate::sync::{LiveRegistry, SyncSettings};

/// Shared application state.
///
/// Handed to the gRPC service and the health router. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn ResourceStore>,
    registry: LiveRegistry,
    settings: SyncSettings,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: LiveRegistry,
        settings: SyncSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                registry,
                settings,
                shutdown,
            }),
        }
    }

    /// Get a handle to the resource store.
    pub fn store(&self) -> Arc<dyn ResourceStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn registry(&self) -> &LiveRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> SyncSettings {
        self.inner.settings
    }

    /// A fresh receiver for the server-wide shutdown signal.
    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.clone()
    }
}
