//! Instance monitor: poll a service's instances and persist the healthy ones.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tokio::sync::broadcast;

use tether_client::{ClientError, Connector, NamingClient};
use tether_core::{NacosSettings, ServiceName};
use tether_sync::write_snapshot;

use crate::error::{io_err, DaemonError};
use crate::log_rotation::spawn_rotation_task;
use crate::paths::{snapshot_dir, DEFAULT_SERVICE, POLL_INTERVAL};
use crate::retry::{with_retry, RetryPolicy};
use crate::tasks::{blocking, handle_join, spawn_signal_task};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub service: ServiceName,
    pub settings: NacosSettings,
    pub output_dir: PathBuf,
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub log_file: Option<PathBuf>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            service: ServiceName::from(DEFAULT_SERVICE),
            settings: NacosSettings::default(),
            output_dir: snapshot_dir(),
            interval: POLL_INTERVAL,
            retry: RetryPolicy::default(),
            log_file: None,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Snapshot replaced with `healthy` of `total` listed instances.
    Persisted {
        healthy: usize,
        total: usize,
        path: PathBuf,
    },
    /// The registry answered with something unusable; nothing written.
    NoData,
    /// The list call or the write failed; nothing written.
    Failed,
}

pub struct InstanceMonitor {
    service: ServiceName,
    output_dir: PathBuf,
    client: Arc<dyn NamingClient>,
}

impl InstanceMonitor {
    pub fn new(
        service: ServiceName,
        output_dir: impl Into<PathBuf>,
        client: Arc<dyn NamingClient>,
    ) -> Self {
        Self {
            service,
            output_dir: output_dir.into(),
            client,
        }
    }

    /// Connect with bounded retry.
    pub async fn connect(
        options: &MonitorOptions,
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
            options.output_dir.clone(),
            client,
        ))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ensure_output_dir(&self) -> Result<(), DaemonError> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir).map_err(|e| io_err(&self.output_dir, e))?;
            tracing::info!(dir = %self.output_dir.display(), "created snapshot directory");
        }
        Ok(())
    }

    /// List, filter and persist once. Never fails; the outcome says what happened.
    pub fn poll_once(&self) -> PollOutcome {
        let instances = match self.client.list_instances(&self.service) {
            Ok(instances) => instances,
            Err(ClientError::Malformed(detail)) => {
                tracing::warn!(service = %self.service, detail = %detail, "no instance data in registry response");
                return PollOutcome::NoData;
            }
            Err(err) => {
                tracing::error!(service = %self.service, error = %err, "listing instances failed");
                return PollOutcome::Failed;
            }
        };

        tracing::info!(service = %self.service, count = instances.len(), "instances listed");
        for instance in &instances {
            tracing::info!(
                ip = %instance.ip,
                port = instance.port,
                healthy = instance.healthy,
                weight = instance.weight,
                "instance"
            );
        }

        match write_snapshot(&self.output_dir, &self.service, &instances, Local::now()) {
            Ok((path, healthy)) => PollOutcome::Persisted {
                healthy,
                total: instances.len(),
                path,
            },
            Err(err) => {
                tracing::error!(service = %self.service, error = %err, "snapshot write failed");
                PollOutcome::Failed
            }
        }
    }

    /// Poll immediately, then every `interval` until shutdown.
    pub async fn run_until(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        loop {
            let monitor = self.clone();
            let outcome = blocking("poll", move || monitor.poll_once()).await?;
            tracing::debug!(?outcome, "poll finished");

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!(service = %self.service, "monitor stopped");
        Ok(())
    }
}

/// Run the monitor until SIGINT/SIGTERM.
pub async fn run_monitor(
    options: MonitorOptions,
    connector: Arc<dyn Connector>,
) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let signal_handle = spawn_signal_task(shutdown_tx.clone());

    let result = run_monitor_until(options, connector, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(());
    handle_join("signal_handler", signal_handle.await)?;
    result
}

/// Run the monitor until `shutdown` is broadcast.
pub async fn run_monitor_until(
    options: MonitorOptions,
    connector: Arc<dyn Connector>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let poll_shutdown = shutdown_tx.subscribe();
    let monitor = Arc::new(InstanceMonitor::connect(&options, connector).await?);
    monitor.ensure_output_dir()?;
    tracing::info!(
        service = %options.service,
        dir = %monitor.output_dir().display(),
        interval = ?options.interval,
        "monitor started"
    );

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let interval = options.interval;
        tokio::spawn(async move {
            let result = monitor.run_until(interval, poll_shutdown).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = spawn_rotation_task(options.log_file.clone(), &shutdown_tx);

    let (poll_result, rotation_result) = tokio::join!(poll_handle, rotation_handle);
    handle_join("poll", poll_result)?;
    handle_join("log_rotation", rotation_result)?;
    Ok(())
}
