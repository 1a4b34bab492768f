//! Config-sync state machine.
//!
//! [`ConfigSync`] owns the active mapping, one [`WatcherRegistration`] per
//! mapped data id and the config client. Every method blocks on client I/O;
//! the runtime drives it from a single processor task, so the watcher set is
//! never touched concurrently.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tether_client::{ChangeListener, ConfigClient, Connector, Subscription};
use tether_core::mapping::{self, ConfigMapping, MappingDiff};
use tether_core::{ConfigKey, DataId, MappingEntry, NacosSettings};
use tether_sync::write_config;

use crate::error::DaemonError;

/// Work item for the config-sync processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The mapping file was created or modified on disk.
    MappingChanged,
    /// A watched remote config published new content.
    RemoteChanged { key: ConfigKey, content: String },
}

/// Where remote-change listeners deliver their events.
pub type EventSink = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// A live remote watch for one data id.
#[derive(Debug)]
pub struct WatcherRegistration {
    key: ConfigKey,
    subscription: Subscription,
}

impl WatcherRegistration {
    fn cancel(self) {
        self.subscription.cancel();
    }
}

/// What a reconcile pass did, by data id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub removed: Vec<DataId>,
    pub added: Vec<DataId>,
    /// Group changed: old watch cancelled, new one subscribed.
    pub replaced: Vec<DataId>,
    pub unchanged: Vec<DataId>,
    /// Initial fetches that landed on disk.
    pub written: Vec<DataId>,
}

pub struct ConfigSync {
    mapping_path: PathBuf,
    settings: NacosSettings,
    mapping: ConfigMapping,
    watchers: BTreeMap<DataId, WatcherRegistration>,
    client: Arc<dyn ConfigClient>,
    connector: Arc<dyn Connector>,
    sink: EventSink,
}

impl ConfigSync {
    /// Build an idle state around an established connection. The mapping is
    /// empty until the first [`ConfigSync::apply`].
    pub fn new(
        mapping_path: impl Into<PathBuf>,
        settings: NacosSettings,
        client: Arc<dyn ConfigClient>,
        connector: Arc<dyn Connector>,
        sink: EventSink,
    ) -> Self {
        Self {
            mapping_path: mapping_path.into(),
            settings,
            mapping: ConfigMapping::new(),
            watchers: BTreeMap::new(),
            client,
            connector,
            sink,
        }
    }

    pub fn settings(&self) -> &NacosSettings {
        &self.settings
    }

    /// Keys with a live registration, ordered by data id.
    pub fn watched_keys(&self) -> Vec<ConfigKey> {
        self.watchers.values().map(|w| w.key.clone()).collect()
    }

    /// Reconcile the current mapping into `new`.
    pub fn apply(&mut self, new: ConfigMapping) -> ReconcileReport {
        let old = std::mem::take(&mut self.mapping);
        self.reconcile(&old, new)
    }

    /// Re-read the mapping file and reconcile.
    ///
    /// Changed connection settings build a new client and re-subscribe every
    /// entry on it. On a parse or connect error the active state is kept.
    pub fn reload(&mut self) -> Result<ReconcileReport, DaemonError> {
        let file = mapping::load_at(&self.mapping_path)?;

        if file.nacos == self.settings {
            return Ok(self.apply(file.config_mapping));
        }

        tracing::info!(
            servers = %file.nacos.server_addresses,
            "connection settings changed, reconnecting"
        );
        let client = self.connector.connect_config(&file.nacos)?;
        self.cancel_all();
        self.client = client;
        self.settings = file.nacos;
        self.mapping.clear();
        Ok(self.reconcile(&ConfigMapping::new(), file.config_mapping))
    }

    /// Bring the watcher set from `old` to `new`; `new` becomes the active mapping.
    pub fn reconcile(&mut self, old: &ConfigMapping, new: ConfigMapping) -> ReconcileReport {
        let diff = MappingDiff::between(old, &new);
        let mut report = ReconcileReport {
            removed: diff.removed.clone(),
            added: diff.added.clone(),
            replaced: diff.regrouped.clone(),
            unchanged: diff.unchanged.clone(),
            written: Vec::new(),
        };

        for data_id in &diff.removed {
            if let Some(registration) = self.watchers.remove(data_id) {
                tracing::info!(config = %registration.key, "watch removed");
                registration.cancel();
            }
        }
        for data_id in &diff.regrouped {
            if let Some(registration) = self.watchers.remove(data_id) {
                tracing::info!(config = %registration.key, "watch replaced, group changed");
                registration.cancel();
            }
        }
        for data_id in &diff.retargeted {
            tracing::info!(
                data_id = %data_id,
                "target path or mode changed; next remote change writes to the new target"
            );
        }

        self.mapping = new;

        for data_id in diff.to_subscribe() {
            let Some(entry) = self.mapping.get(data_id).cloned() else {
                continue;
            };
            if self.watch(data_id, &entry) && self.initial_fetch(data_id, &entry) {
                report.written.push(data_id.clone());
            }
        }

        if diff.is_noop() {
            tracing::debug!(entries = self.mapping.len(), "mapping unchanged, nothing to reconcile");
        } else {
            tracing::info!(
                removed = report.removed.len(),
                added = report.added.len(),
                replaced = report.replaced.len(),
                unchanged = report.unchanged.len(),
                written = report.written.len(),
                "reconcile complete"
            );
        }
        report
    }

    /// Write pushed content to the mapped target of `key`.
    ///
    /// Returns the written path, or `None` when the delivery was ignored.
    pub fn on_remote_change(
        &self,
        key: &ConfigKey,
        content: &str,
    ) -> Result<Option<PathBuf>, DaemonError> {
        let Some(entry) = self.mapping.get(&key.data_id) else {
            tracing::warn!(config = %key, "change for unmapped data id ignored");
            return Ok(None);
        };
        if entry.group != key.group {
            tracing::warn!(
                config = %key,
                current_group = %entry.group,
                "stale change from a replaced watch ignored"
            );
            return Ok(None);
        }
        write_config(&entry.file_path, content, entry.file_mode)?;
        Ok(Some(entry.file_path.clone()))
    }

    /// Apply one event, logging instead of failing.
    pub fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::MappingChanged => {
                tracing::info!(path = %self.mapping_path.display(), "mapping file changed, reloading");
                if let Err(err) = self.reload() {
                    tracing::error!(error = %err, "mapping reload failed, keeping active mapping");
                }
            }
            SyncEvent::RemoteChanged { key, content } => {
                if let Err(err) = self.on_remote_change(&key, &content) {
                    tracing::error!(config = %key, error = %err, "failed to apply remote change");
                }
            }
        }
    }

    /// Cancel every remote watch.
    pub fn cancel_all(&mut self) {
        for (_, registration) in std::mem::take(&mut self.watchers) {
            registration.cancel();
        }
    }

    fn listener_for(&self, key: &ConfigKey) -> ChangeListener {
        let sink = self.sink.clone();
        let key = key.clone();
        Arc::new(move |content: String| {
            sink(SyncEvent::RemoteChanged {
                key: key.clone(),
                content,
            })
        })
    }

    fn watch(&mut self, data_id: &DataId, entry: &MappingEntry) -> bool {
        let key = entry.key(data_id);
        if let Some(stale) = self.watchers.remove(data_id) {
            stale.cancel();
        }
        match self.client.subscribe(&key, self.listener_for(&key)) {
            Ok(subscription) => {
                tracing::info!(config = %key, path = %entry.file_path.display(), "watch added");
                self.watchers.insert(
                    data_id.clone(),
                    WatcherRegistration { key, subscription },
                );
                true
            }
            Err(err) => {
                tracing::error!(config = %key, error = %err, "subscribe failed");
                false
            }
        }
    }

    fn initial_fetch(&self, data_id: &DataId, entry: &MappingEntry) -> bool {
        let key = entry.key(data_id);
        match self.client.get_config(&key) {
            Ok(Some(content)) if !content.is_empty() => {
                write_config(&entry.file_path, &content, entry.file_mode).is_ok()
            }
            Ok(_) => {
                tracing::info!(config = %key, "no remote content yet, nothing written");
                false
            }
            Err(err) => {
                tracing::warn!(config = %key, error = %err, "initial fetch failed, watch kept");
                false
            }
        }
    }
}

impl Drop for ConfigSync {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
