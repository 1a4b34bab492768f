//! In-process registry and config center.
//!
//! Behaves like a remote backend from the caller's side (listeners fire on
//! the publishing thread, subscriptions cancel on drop) and records what was
//! asked of it so callers can assert on fetches, watches and heartbeats.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tether_core::{ConfigKey, InstanceRegistration, NacosSettings, ServiceInstance, ServiceName};

use crate::client::{ChangeListener, ConfigClient, Connector, NamingClient, Subscription};
use crate::error::ClientError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Config center
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConfigState {
    values: HashMap<ConfigKey, String>,
    listeners: BTreeMap<u64, (ConfigKey, ChangeListener)>,
    next_id: u64,
    fetches: HashMap<ConfigKey, usize>,
    failing: HashSet<ConfigKey>,
}

/// Config center kept in memory.
#[derive(Default)]
pub struct MemoryConfigCenter {
    state: Arc<Mutex<ConfigState>>,
}

impl MemoryConfigCenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `content` without notifying listeners.
    pub fn set(&self, key: &ConfigKey, content: impl Into<String>) {
        lock(&self.state).values.insert(key.clone(), content.into());
    }

    /// Store `content` and notify every listener of `key`.
    pub fn publish(&self, key: &ConfigKey, content: impl Into<String>) {
        let content = content.into();
        let listeners: Vec<ChangeListener> = {
            let mut state = lock(&self.state);
            state.values.insert(key.clone(), content.clone());
            state
                .listeners
                .values()
                .filter(|(k, _)| k == key)
                .map(|(_, listener)| listener.clone())
                .collect()
        };
        for listener in listeners {
            listener(content.clone());
        }
    }

    pub fn remove(&self, key: &ConfigKey) {
        lock(&self.state).values.remove(key);
    }

    /// Make every `get_config` for `key` fail until [`Self::heal`].
    pub fn fail_fetches(&self, key: &ConfigKey) {
        lock(&self.state).failing.insert(key.clone());
    }

    pub fn heal(&self, key: &ConfigKey) {
        lock(&self.state).failing.remove(key);
    }

    pub fn fetch_count(&self, key: &ConfigKey) -> usize {
        lock(&self.state).fetches.get(key).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        lock(&self.state).fetches.values().sum()
    }

    pub fn reset_counters(&self) {
        lock(&self.state).fetches.clear();
    }

    /// Keys with a live subscription, sorted, one entry per subscription.
    pub fn active_subscriptions(&self) -> Vec<ConfigKey> {
        let mut keys: Vec<ConfigKey> = lock(&self.state)
            .listeners
            .values()
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl ConfigClient for MemoryConfigCenter {
    fn get_config(&self, key: &ConfigKey) -> Result<Option<String>, ClientError> {
        let mut state = lock(&self.state);
        *state.fetches.entry(key.clone()).or_default() += 1;
        if state.failing.contains(key) {
            return Err(ClientError::Unavailable(format!("fetch of {key} refused")));
        }
        Ok(state.values.get(key).cloned())
    }

    fn subscribe(
        &self,
        key: &ConfigKey,
        listener: ChangeListener,
    ) -> Result<Subscription, ClientError> {
        let id = {
            let mut state = lock(&self.state);
            state.next_id += 1;
            let id = state.next_id;
            state.listeners.insert(id, (key.clone(), listener));
            id
        };
        let state = Arc::downgrade(&self.state);
        Ok(Subscription::new(key.clone(), move || {
            if let Some(state) = state.upgrade() {
                lock(&state).listeners.remove(&id);
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryState {
    services: HashMap<ServiceName, Vec<ServiceInstance>>,
    heartbeats: usize,
    failing_lists: usize,
    malformed: bool,
}

/// Service registry kept in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_instances(&self, service: &ServiceName, instances: Vec<ServiceInstance>) {
        lock(&self.state)
            .services
            .insert(service.clone(), instances);
    }

    pub fn instances(&self, service: &ServiceName) -> Vec<ServiceInstance> {
        lock(&self.state)
            .services
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `count` list calls.
    pub fn fail_next_lists(&self, count: usize) {
        lock(&self.state).failing_lists = count;
    }

    /// Answer list calls as if the response had an unexpected shape.
    pub fn respond_malformed(&self, malformed: bool) {
        lock(&self.state).malformed = malformed;
    }

    pub fn heartbeat_count(&self) -> usize {
        lock(&self.state).heartbeats
    }
}

impl NamingClient for MemoryRegistry {
    fn register_instance(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        let instances = state.services.entry(service.clone()).or_default();
        instances.retain(|i| !(i.ip == instance.ip && i.port == instance.port));
        let mut registered = ServiceInstance::new(instance.ip.clone(), instance.port);
        registered.weight = instance.weight;
        registered.metadata = instance.metadata.clone();
        registered.ephemeral = instance.ephemeral;
        registered.cluster_name = Some(instance.cluster_name.clone());
        instances.push(registered);
        Ok(())
    }

    fn send_heartbeat(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        let known = state
            .services
            .get(service)
            .map(|list| {
                list.iter()
                    .any(|i| i.ip == instance.ip && i.port == instance.port)
            })
            .unwrap_or(false);
        if !known {
            return Err(ClientError::Unavailable(format!(
                "instance {}:{} unknown to registry",
                instance.ip, instance.port
            )));
        }
        state.heartbeats += 1;
        Ok(())
    }

    fn deregister_instance(
        &self,
        service: &ServiceName,
        ip: &str,
        port: u16,
    ) -> Result<(), ClientError> {
        if let Some(instances) = lock(&self.state).services.get_mut(service) {
            instances.retain(|i| !(i.ip == ip && i.port == port));
        }
        Ok(())
    }

    fn list_instances(&self, service: &ServiceName) -> Result<Vec<ServiceInstance>, ClientError> {
        let mut state = lock(&self.state);
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(ClientError::Unavailable("list refused".into()));
        }
        if state.malformed {
            return Err(ClientError::Malformed(
                "instance list has no 'hosts' field".into(),
            ));
        }
        Ok(state.services.get(service).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Hands out the shared in-memory backends; can refuse the first connects.
pub struct MemoryConnector {
    config: Arc<MemoryConfigCenter>,
    registry: Arc<MemoryRegistry>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
    connected: Mutex<Vec<NacosSettings>>,
}

impl MemoryConnector {
    pub fn new(config: Arc<MemoryConfigCenter>, registry: Arc<MemoryRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            connected: Mutex::new(Vec::new()),
        })
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Connect attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Settings of every successful connect, in order.
    pub fn connections(&self) -> Vec<NacosSettings> {
        lock(&self.connected).clone()
    }

    fn admit(&self, settings: &NacosSettings) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::Transport {
                server: settings.server_addresses.clone(),
                message: "connection refused".into(),
            });
        }
        lock(&self.connected).push(settings.clone());
        Ok(())
    }
}

impl Connector for MemoryConnector {
    fn connect_config(
        &self,
        settings: &NacosSettings,
    ) -> Result<Arc<dyn ConfigClient>, ClientError> {
        self.admit(settings)?;
        Ok(self.config.clone())
    }

    fn connect_naming(
        &self,
        settings: &NacosSettings,
    ) -> Result<Arc<dyn NamingClient>, ClientError> {
        self.admit(settings)?;
        Ok(self.registry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_only_matching_listeners() {
        let center = MemoryConfigCenter::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        let _a = center
            .subscribe(
                &ConfigKey::new("a", "g"),
                Arc::new(move |c: String| sink.lock().unwrap().push(c)),
            )
            .expect("subscribe");

        center.publish(&ConfigKey::new("b", "g"), "ignored");
        center.publish(&ConfigKey::new("a", "g"), "v1");
        assert_eq!(*hits.lock().unwrap(), vec!["v1".to_string()]);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let center = MemoryConfigCenter::new();
        let sub = center
            .subscribe(&ConfigKey::new("a", "g"), Arc::new(|_c: String| {}))
            .expect("subscribe");
        assert_eq!(center.active_subscriptions(), vec![ConfigKey::new("a", "g")]);
        drop(sub);
        assert!(center.active_subscriptions().is_empty());
    }

    #[test]
    fn fetches_are_counted_even_when_failing() {
        let center = MemoryConfigCenter::new();
        let key = ConfigKey::new("a", "g");
        center.set(&key, "v");
        assert_eq!(center.get_config(&key).unwrap().as_deref(), Some("v"));
        center.fail_fetches(&key);
        assert!(center.get_config(&key).is_err());
        assert_eq!(center.fetch_count(&key), 2);

        center.heal(&key);
        assert_eq!(center.get_config(&key).unwrap().as_deref(), Some("v"));
        center.remove(&key);
        assert_eq!(center.get_config(&key).unwrap(), None);
        assert_eq!(center.fetch_count(&key), 4);
    }

    #[test]
    fn heartbeat_requires_registration() {
        let registry = MemoryRegistry::new();
        let service = ServiceName::from("orders");
        let me = InstanceRegistration::new("127.0.0.1", 4000);
        assert!(registry.send_heartbeat(&service, &me).is_err());

        registry.register_instance(&service, &me).unwrap();
        registry.send_heartbeat(&service, &me).unwrap();
        assert_eq!(registry.heartbeat_count(), 1);

        registry
            .deregister_instance(&service, "127.0.0.1", 4000)
            .unwrap();
        assert!(registry.instances(&service).is_empty());
    }

    #[test]
    fn connector_refuses_then_admits() {
        let connector = MemoryConnector::new(MemoryConfigCenter::new(), MemoryRegistry::new());
        connector.refuse_next(2);
        let settings = NacosSettings::default();
        assert!(connector.connect_naming(&settings).is_err());
        assert!(connector.connect_naming(&settings).is_err());
        assert!(connector.connect_naming(&settings).is_ok());
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.connections().len(), 1);
    }
}
