//! Instance registrar: announce one ephemeral instance and keep it alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tether_client::{Connector, NamingClient};
use tether_core::{InstanceRegistration, NacosSettings, ServiceName};

use crate::error::DaemonError;
use crate::log_rotation::spawn_rotation_task;
use crate::paths::{DEFAULT_SERVICE, HEARTBEAT_INTERVAL, REGISTRAR_IP, REGISTRAR_PORT};
use crate::retry::{with_retry, RetryPolicy};
use crate::tasks::{blocking, handle_join, spawn_signal_task};

#[derive(Debug, Clone)]
pub struct RegistrarOptions {
    pub service: ServiceName,
    pub settings: NacosSettings,
    pub instance: InstanceRegistration,
    pub heartbeat: Duration,
    pub retry: RetryPolicy,
    pub log_file: Option<PathBuf>,
}

impl Default for RegistrarOptions {
    fn default() -> Self {
        Self {
            service: ServiceName::from(DEFAULT_SERVICE),
            settings: NacosSettings::default(),
            instance: InstanceRegistration::new(REGISTRAR_IP, REGISTRAR_PORT)
                .with_metadata("version", "1.0"),
            heartbeat: HEARTBEAT_INTERVAL,
            retry: RetryPolicy::default(),
            log_file: None,
        }
    }
}

pub struct Registrar {
    service: ServiceName,
    instance: InstanceRegistration,
    client: Arc<dyn NamingClient>,
}

impl Registrar {
    pub fn new(
        service: ServiceName,
        instance: InstanceRegistration,
        client: Arc<dyn NamingClient>,
    ) -> Self {
        Self {
            service,
            instance,
            client,
        }
    }

    /// Connect with bounded retry.
    pub async fn connect(
        options: &RegistrarOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, DaemonError> {
        let settings = options.settings.clone();
        let client = with_retry(options.retry, "registry", move || {
            let connector = connector.clone();
            let settings = settings.clone();
            async move {
                blocking("connect", move || connector.connect_naming(&settings))
                    .await?
                    .map_err(DaemonError::from)
            }
        })
        .await?;
        Ok(Self::new(
            options.service.clone(),
            options.instance.clone(),
            client,
        ))
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    pub fn instance(&self) -> &InstanceRegistration {
        &self.instance
    }

    pub async fn register(&self) -> Result<(), DaemonError> {
        let (client, service, instance) = self.parts();
        blocking("register", move || client.register_instance(&service, &instance)).await??;
        tracing::info!(
            service = %self.service,
            ip = %self.instance.ip,
            port = self.instance.port,
            "instance registered"
        );
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<(), DaemonError> {
        let (client, service, instance) = self.parts();
        blocking("heartbeat", move || client.send_heartbeat(&service, &instance)).await??;
        tracing::debug!(service = %self.service, "heartbeat sent");
        Ok(())
    }

    pub async fn deregister(&self) -> Result<(), DaemonError> {
        let (client, service, instance) = self.parts();
        let result = blocking("deregister", move || {
            client.deregister_instance(&service, &instance.ip, instance.port)
        })
        .await?;
        match result {
            Ok(()) => {
                tracing::info!(service = %self.service, "instance deregistered");
                Ok(())
            }
            Err(err) => {
                tracing::error!(service = %self.service, error = %err, "deregistration failed");
                Err(err.into())
            }
        }
    }

    /// Send a heartbeat every `interval` until shutdown. Failures are logged.
    pub async fn heartbeat_until(&self, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.heartbeat().await {
                        tracing::warn!(service = %self.service, error = %err, "heartbeat failed");
                    }
                }
            }
        }
    }

    /// Heartbeat and rotate `log_file` until SIGINT/SIGTERM, then deregister.
    pub async fn serve_until_signal(
        &self,
        interval: Duration,
        log_file: Option<PathBuf>,
    ) -> Result<(), DaemonError> {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let signal_handle = spawn_signal_task(shutdown_tx.clone());

        let result = self.serve_until(interval, log_file, shutdown_tx.clone()).await;
        let _ = shutdown_tx.send(());
        handle_join("signal_handler", signal_handle.await)?;
        result
    }

    /// Heartbeat and rotate `log_file` until `shutdown` is broadcast, then deregister.
    pub async fn serve_until(
        &self,
        interval: Duration,
        log_file: Option<PathBuf>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(), DaemonError> {
        let heartbeat_shutdown = shutdown_tx.subscribe();
        let rotation_handle = spawn_rotation_task(log_file, &shutdown_tx);

        self.heartbeat_until(interval, heartbeat_shutdown).await;
        let _ = shutdown_tx.send(());
        tracing::info!(service = %self.service, "shutting down, deregistering");

        let deregistered = self.deregister().await;
        handle_join("log_rotation", rotation_handle.await)?;
        deregistered
    }

    fn parts(&self) -> (Arc<dyn NamingClient>, ServiceName, InstanceRegistration) {
        (
            self.client.clone(),
            self.service.clone(),
            self.instance.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;
    use tether_client::{MemoryConfigCenter, MemoryConnector, MemoryRegistry};

    use crate::log_rotation::{MAX_LOG_BYTES, ROTATION_CHECK_INTERVAL};

    fn options() -> RegistrarOptions {
        RegistrarOptions {
            retry: RetryPolicy::new(2, Duration::from_secs(1)),
            ..RegistrarOptions::default()
        }
    }

    #[test]
    fn defaults_announce_local_instance() {
        let options = RegistrarOptions::default();
        assert_eq!(options.service, ServiceName::from("python-service"));
        assert_eq!(options.instance.ip, "127.0.0.1");
        assert_eq!(options.instance.port, 4000);
        assert_eq!(options.instance.metadata.get("version").map(String::as_str), Some("1.0"));
        assert!(options.instance.ephemeral);
        assert_eq!(options.heartbeat, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn register_heartbeat_deregister_cycle() {
        let registry = MemoryRegistry::new();
        let connector = MemoryConnector::new(MemoryConfigCenter::new(), registry.clone());
        let registrar = Registrar::connect(&options(), connector).await.unwrap();

        registrar.register().await.unwrap();
        let listed = registry.instances(registrar.service());
        assert_eq!(listed.len(), 1);
        assert!(listed[0].healthy && listed[0].ephemeral);

        let (tx, rx) = broadcast::channel(1);
        let beats = async {
            registrar.heartbeat_until(Duration::from_secs(5), rx).await;
        };
        let stop = async {
            tokio::time::sleep(Duration::from_secs(16)).await;
            tx.send(()).unwrap();
        };
        tokio::join!(beats, stop);
        assert_eq!(registry.heartbeat_count(), 3);

        registrar.deregister().await.unwrap();
        assert!(registry.instances(registrar.service()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn serve_rotates_log_and_deregisters_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("tether_register.log");
        fs::write(&log, vec![b'x'; MAX_LOG_BYTES as usize]).unwrap();

        let registry = MemoryRegistry::new();
        let connector = MemoryConnector::new(MemoryConfigCenter::new(), registry.clone());
        let registrar = Registrar::connect(&options(), connector).await.unwrap();
        registrar.register().await.unwrap();

        let (tx, _) = broadcast::channel(4);
        let serve = registrar.serve_until(Duration::from_secs(5), Some(log.clone()), tx.clone());
        let stop = async {
            tokio::time::sleep(ROTATION_CHECK_INTERVAL * 3).await;
            tx.send(()).unwrap();
        };
        let (served, ()) = tokio::join!(serve, stop);

        served.unwrap();
        assert!(!log.exists(), "oversized log must have been rotated");
        assert!(dir.path().join("tether_register.log.1").exists());
        assert!(registry.heartbeat_count() >= 2);
        assert!(registry.instances(registrar.service()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failures_do_not_stop_the_loop() {
        let registry = MemoryRegistry::new();
        let connector = MemoryConnector::new(MemoryConfigCenter::new(), registry.clone());
        // Never registered: every heartbeat is refused.
        let registrar = Registrar::connect(&options(), connector).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let beats = registrar.heartbeat_until(Duration::from_secs(5), rx);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(11)).await;
            tx.send(()).unwrap();
        };
        tokio::join!(beats, stop);
        assert_eq!(registry.heartbeat_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_policy_attempts() {
        let connector = MemoryConnector::new(MemoryConfigCenter::new(), MemoryRegistry::new());
        connector.refuse_next(5);
        let err = Registrar::connect(&options(), connector.clone())
            .await
            .err()
            .expect("connect must fail");
        assert!(matches!(err, DaemonError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(connector.attempts(), 2);
    }
}
