//! Generic config store with change notification.
//!
//! `ConfigStore<T>` holds the current snapshot as an `Arc<T>` inside a
//! `watch` channel, so readers clone a cheap handle and consumers can react to
//! changes without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// A shared, versioned configuration store with change notification.
pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    tx: watch::Sender<Arc<T>>,
    version: AtomicU64,
}

/// Receives notifications when a [`ConfigStore`] is updated.
///
/// Call [`changed()`](ConfigWatcher::changed) to wait for the next snapshot.
pub struct ConfigWatcher<T> {
    rx: watch::Receiver<Arc<T>>,
}

// -- ConfigStore --------------------------------------------------------

impl<T> ConfigStore<T> {
    /// Create a new `ConfigStore` with the given initial value.
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            inner: Arc::new(ConfigStoreInner {
                tx,
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    ///
    /// Returns the new version number.
    pub fn update(&self, value: T) -> u64 {
        self.inner.tx.send_replace(Arc::new(value));
        self.inner.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.inner.tx.borrow())
    }

    /// Number of updates applied since creation.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    /// Subscribe to change notifications.
    ///
    /// The snapshot current at subscription time counts as already seen.
    pub fn subscribe(&self) -> ConfigWatcher<T> {
        ConfigWatcher {
            rx: self.inner.tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// -- ConfigWatcher ------------------------------------------------------

impl<T> ConfigWatcher<T> {
    /// Wait until the config store is updated and return the new snapshot.
    ///
    /// Returns `Err` once every [`ConfigStore`] handle has been dropped.
    pub async fn changed(&mut self) -> Result<Arc<T>, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(Arc::clone(&self.rx.borrow_and_update()))
    }
}
