//! Client traits implemented by every backend.

use std::fmt;
use std::sync::Arc;

use tether_core::{ConfigKey, InstanceRegistration, NacosSettings, ServiceInstance, ServiceName};

use crate::error::ClientError;

/// Receives the new content of one watched config.
///
/// The listener is bound to a single key when it is built, so it only
/// carries the content.
pub type ChangeListener = Arc<dyn Fn(String) + Send + Sync>;

/// Live remote watch. Cancelled on [`Subscription::cancel`] or drop.
pub struct Subscription {
    key: ConfigKey,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(key: ConfigKey, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Cancel the remote watch now.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Config center operations. All calls block the calling thread.
pub trait ConfigClient: Send + Sync {
    /// Current content of `key`; `None` when the config does not exist.
    fn get_config(&self, key: &ConfigKey) -> Result<Option<String>, ClientError>;

    /// Start watching `key`. `listener` is invoked from a client-owned thread.
    fn subscribe(
        &self,
        key: &ConfigKey,
        listener: ChangeListener,
    ) -> Result<Subscription, ClientError>;
}

/// Registry operations. All calls block the calling thread.
pub trait NamingClient: Send + Sync {
    fn register_instance(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError>;

    /// Keep an ephemeral instance alive.
    fn send_heartbeat(
        &self,
        service: &ServiceName,
        instance: &InstanceRegistration,
    ) -> Result<(), ClientError>;

    fn deregister_instance(
        &self,
        service: &ServiceName,
        ip: &str,
        port: u16,
    ) -> Result<(), ClientError>;

    /// Every instance of `service`, healthy or not.
    fn list_instances(&self, service: &ServiceName) -> Result<Vec<ServiceInstance>, ClientError>;
}

/// Builds client handles from connection settings.
pub trait Connector: Send + Sync {
    fn connect_config(&self, settings: &NacosSettings)
        -> Result<Arc<dyn ConfigClient>, ClientError>;

    fn connect_naming(&self, settings: &NacosSettings)
        -> Result<Arc<dyn NamingClient>, ClientError>;
}
