//! Signal handling and task plumbing shared by the runtimes.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{io_err, DaemonError};

/// Resolve on SIGINT or SIGTERM, returning the signal's name.
#[cfg(unix)]
pub(crate) async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.map_err(|e| io_err("SIGINT handler", e))?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
pub(crate) async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| io_err("ctrl-c handler", e))?;
    Ok("ctrl-c")
}

/// Broadcast shutdown when a signal arrives; exit quietly if shutdown
/// was already broadcast by another task.
pub(crate) fn spawn_signal_task(
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<Result<(), DaemonError>> {
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => Ok(()),
            signal = shutdown_signal() => {
                let name = signal?;
                tracing::info!(signal = name, "received signal, shutting down");
                let _ = shutdown.send(());
                Ok(())
            }
        }
    })
}

pub(crate) fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::TaskJoin(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Run blocking client or filesystem work off the async workers.
pub(crate) async fn blocking<T, F>(task: &'static str, f: F) -> Result<T, DaemonError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| DaemonError::TaskJoin(format!("{task} task join failure: {err}")))
}
