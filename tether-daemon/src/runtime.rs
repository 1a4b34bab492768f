//! Config-sync daemon runtime: mapping-file watcher + event processor.
//!
//! Filesystem events and remote-change callbacks both become [`SyncEvent`]s on
//! one channel. A single processor task owns the [`ConfigSync`] state and runs
//! each event on the blocking pool, so events are applied strictly in order.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use tether_client::{ConfigClient, Connector};
use tether_core::mapping;

use crate::config_sync::{ConfigSync, EventSink, SyncEvent};
use crate::error::{io_err, DaemonError};
use crate::log_rotation::spawn_rotation_task;
use crate::logging::{init_tracing, LogOptions};
use crate::paths::DEBOUNCE_WINDOW;
use crate::retry::{with_retry, RetryPolicy};
use crate::tasks::{blocking, handle_join, spawn_signal_task};

/// Runtime knobs for the config-sync daemon.
#[derive(Debug, Clone)]
pub struct ConfigSyncOptions {
    pub retry: RetryPolicy,
    /// Quiet period after the last mapping-file event before reloading.
    pub debounce: Duration,
    /// Log file to rotate while running.
    pub log_file: Option<PathBuf>,
}

impl Default for ConfigSyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            debounce: DEBOUNCE_WINDOW,
            log_file: None,
        }
    }
}

/// Initialise logging, start a tokio runtime and block on `task`.
pub fn start_blocking<F>(log: &LogOptions, task: F) -> Result<(), DaemonError>
where
    F: Future<Output = Result<(), DaemonError>>,
{
    init_tracing(log)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(task)
}

/// Run the config-sync daemon until SIGINT/SIGTERM.
pub async fn run_config_sync(
    mapping_path: PathBuf,
    connector: Arc<dyn Connector>,
    options: ConfigSyncOptions,
) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let signal_handle = spawn_signal_task(shutdown_tx.clone());

    let result = run_config_sync_until(mapping_path, connector, options, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(());
    handle_join("signal_handler", signal_handle.await)?;
    result
}

/// Run the config-sync daemon until `shutdown` is broadcast.
pub async fn run_config_sync_until(
    mapping_path: PathBuf,
    connector: Arc<dyn Connector>,
    options: ConfigSyncOptions,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    // Canonicalize so watcher event paths compare equal.
    let mapping_path = fs::canonicalize(&mapping_path).unwrap_or(mapping_path);
    // Subscribe before any await so an early shutdown is not missed.
    let watcher_shutdown = shutdown_tx.subscribe();
    let processor_shutdown = shutdown_tx.subscribe();

    let (event_tx, event_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let sink: EventSink = {
        let event_tx = event_tx.clone();
        Arc::new(move |event: SyncEvent| {
            let _ = event_tx.send(event);
        })
    };

    let sync = start_sync(&mapping_path, connector, sink, options.retry).await?;
    tracing::info!(
        path = %mapping_path.display(),
        watches = sync.watched_keys().len(),
        "config sync started"
    );

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let mapping_path = mapping_path.clone();
        let debounce = options.debounce;
        tokio::spawn(async move {
            let result = watcher_task(mapping_path, debounce, event_tx, watcher_shutdown).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = processor_task(sync, event_rx, processor_shutdown).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = spawn_rotation_task(options.log_file.clone(), &shutdown_tx);

    let (watcher_result, processor_result, rotation_result) =
        tokio::join!(watcher_handle, processor_handle, rotation_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("log_rotation", rotation_result)?;
    tracing::info!("config sync stopped");
    Ok(())
}

/// Load the mapping, connect with bounded retry and run the first reconcile.
async fn start_sync(
    mapping_path: &Path,
    connector: Arc<dyn Connector>,
    sink: EventSink,
    retry: RetryPolicy,
) -> Result<ConfigSync, DaemonError> {
    let file = {
        let path = mapping_path.to_path_buf();
        blocking("mapping load", move || mapping::load_at(&path)).await??
    };

    let client: Arc<dyn ConfigClient> = {
        let connector = connector.clone();
        let settings = file.nacos.clone();
        with_retry(retry, "config center", move || {
            let connector = connector.clone();
            let settings = settings.clone();
            async move {
                blocking("connect", move || connector.connect_config(&settings))
                    .await?
                    .map_err(DaemonError::from)
            }
        })
        .await?
    };

    let mut sync = ConfigSync::new(mapping_path, file.nacos, client, connector, sink);
    let initial = file.config_mapping;
    let (sync, report) = blocking("initial reconcile", move || {
        let report = sync.apply(initial);
        (sync, report)
    })
    .await?;
    tracing::info!(
        added = report.added.len(),
        written = report.written.len(),
        "initial reconcile complete"
    );
    Ok(sync)
}

async fn processor_task(
    mut sync: ConfigSync,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                sync = blocking("sync event", move || {
                    sync.handle(event);
                    sync
                })
                .await?;
            }
        }
    }

    let watches = sync.watched_keys().len();
    blocking("cancel watches", move || drop(sync)).await?;
    tracing::info!(watches, "remote watches cancelled");
    Ok(())
}

async fn watcher_task(
    mapping_path: PathBuf,
    debounce: Duration,
    events: mpsc::UnboundedSender<SyncEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let watch_dir = directory_to_watch(&mapping_path);

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = fs_tx.send(event);
    })?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %watch_dir.display(), "watching mapping file directory");

    let mut pending: Option<Instant> = None;
    loop {
        let deadline = pending;
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = wait_until(deadline) => {
                pending = None;
                if events.send(SyncEvent::MappingChanged).is_err() {
                    return Err(DaemonError::ChannelClosed("sync events"));
                }
            }
            event = fs_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if event.paths.iter().any(|p| is_mapping_file(p, &mapping_path)) {
                    pending = Some(debounced_deadline(Instant::now(), debounce));
                }
            }
        }
    }

    drop(watcher);
    tracing::info!("mapping file watch stopped");
    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Every event pushes the reload out to `now + window`.
fn debounced_deadline(now: Instant, window: Duration) -> Instant {
    now + window
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_mapping_file(path: &Path, mapping_path: &Path) -> bool {
    path == mapping_path || (path.file_name().is_some() && path.file_name() == mapping_path.file_name())
}

fn directory_to_watch(mapping_path: &Path) -> PathBuf {
    match mapping_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
