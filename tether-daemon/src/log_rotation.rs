//! Size-based rotation of an agent's log file.
//!
//! When the live file reaches [`MAX_LOG_BYTES`] it becomes `<name>.1`, older
//! copies shift up by one and anything past [`MAX_ROTATED_FILES`] is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::DaemonError;

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// How often the rotation task checks the file size.
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Rotate `log_path` if its size reached `max_bytes`.
///
/// Returns `true` if rotation occurred. A missing log file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // The file writer recreates the live log on its next event.
    Ok(true)
}

/// Rotate `log_path` with the default limits, logging the outcome.
pub fn rotate_log(log_path: &Path) {
    match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
        }
    }
}

/// Check `log_path` every [`ROTATION_CHECK_INTERVAL`] until shutdown.
pub async fn rotation_task(
    log_path: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let path = log_path.clone();
                // Failures are logged inside rotate_log.
                tokio::task::spawn_blocking(move || rotate_log(&path)).await.ok();
            }
        }
    }
    Ok(())
}

/// Spawn [`rotation_task`] for `log_file`, broadcasting shutdown if it ever
/// exits early. Without a log file the task returns immediately.
pub(crate) fn spawn_rotation_task(
    log_file: Option<PathBuf>,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<Result<(), DaemonError>> {
    let shutdown = shutdown.clone();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let Some(log_file) = log_file else {
            return Ok(());
        };
        let result = rotation_task(log_file, shutdown_rx).await;
        let _ = shutdown.send(());
        result
    })
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tether.log");
    base.with_file_name(format!("{name}.{n}"))
}
