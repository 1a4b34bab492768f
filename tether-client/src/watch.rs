//! Polling config watcher.
//!
//! One background thread per client fetches every subscribed key on a fixed
//! interval and fires the key's listener when the SHA-256 digest of the
//! content moves. The first observation of existing content also fires, so a
//! freshly subscribed listener always sees the current value at least once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tether_core::ConfigKey;

use crate::client::{ChangeListener, Subscription};
use crate::error::ClientError;

pub(crate) type Fetch = Arc<dyn Fn(&ConfigKey) -> Result<Option<String>, ClientError> + Send + Sync>;

struct Watch {
    key: ConfigKey,
    digest: Option<String>,
    listener: ChangeListener,
}

struct Shared {
    watches: Mutex<HashMap<u64, Watch>>,
    next_id: AtomicU64,
    fetch: Fetch,
}

impl Shared {
    fn watches(&self) -> MutexGuard<'_, HashMap<u64, Watch>> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn poll_once(&self) {
        let snapshot: Vec<(u64, ConfigKey, Option<String>)> = self
            .watches()
            .iter()
            .map(|(id, w)| (*id, w.key.clone(), w.digest.clone()))
            .collect();

        for (id, key, previous) in snapshot {
            let content = match (self.fetch)(&key) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(config = %key, error = %err, "config poll failed");
                    continue;
                }
            };

            let listener = {
                let mut watches = self.watches();
                // Cancelled while we were fetching.
                let Some(watch) = watches.get_mut(&id) else { continue };
                let Some(content) = content.as_deref() else {
                    watch.digest = None;
                    continue;
                };
                let digest = digest(content);
                if previous.as_deref() == Some(digest.as_str()) {
                    continue;
                }
                watch.digest = Some(digest);
                watch.listener.clone()
            };

            if let Some(content) = content {
                tracing::debug!(config = %key, "config change detected");
                listener(content);
            }
        }
    }
}

/// Subscriptions plus the lazily started poll thread.
pub(crate) struct ConfigPoller {
    shared: Arc<Shared>,
    interval: Duration,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl ConfigPoller {
    pub(crate) fn new(fetch: Fetch, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                watches: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                fetch,
            }),
            interval,
            stop_tx: Mutex::new(None),
        }
    }

    pub(crate) fn subscribe(&self, key: &ConfigKey, listener: ChangeListener) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.watches().insert(
            id,
            Watch {
                key: key.clone(),
                digest: None,
                listener,
            },
        );
        self.ensure_running();

        let shared = Arc::downgrade(&self.shared);
        let cancelled = key.clone();
        Subscription::new(key.clone(), move || {
            if let Some(shared) = shared.upgrade() {
                shared.watches().remove(&id);
                tracing::debug!(config = %cancelled, "config watch cancelled");
            }
        })
    }

    pub(crate) fn active(&self) -> usize {
        self.shared.watches().len()
    }

    #[cfg(test)]
    pub(crate) fn poll_once(&self) {
        self.shared.poll_once();
    }

    fn ensure_running(&self) {
        let mut stop_tx = self.stop_tx.lock().unwrap_or_else(|p| p.into_inner());
        if stop_tx.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel::<()>();
        let shared = self.shared.clone();
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name("tether-config-poll".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => shared.poll_once(),
                    // Sender dropped with the client.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        match spawned {
            Ok(_) => *stop_tx = Some(tx),
            Err(err) => tracing::error!(error = %err, "failed to start config poll thread"),
        }
    }
}

fn digest(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    hex::encode(h.finalize())
}
