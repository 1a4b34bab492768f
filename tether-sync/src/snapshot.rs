//! Healthy-instance snapshot files written by the monitor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use tether_core::{ServiceInstance, ServiceName};

use crate::error::{io_err, SyncError};
use crate::writer::atomic_write;

/// Format of [`InstanceRecord::last_update`].
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SNAPSHOT_SUFFIX: &str = "_ips.json";

/// One healthy instance as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    pub last_update: String,
}

impl InstanceRecord {
    fn from_instance(instance: &ServiceInstance, last_update: &str) -> Self {
        Self {
            ip: instance.ip.clone(),
            port: instance.port,
            weight: instance.weight,
            metadata: instance.metadata.clone(),
            last_update: last_update.to_owned(),
        }
    }
}

/// Replace every non-alphanumeric character with `_`.
pub fn sanitize_service_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// `<dir>/<sanitized service>_ips.json`
pub fn snapshot_path(dir: &Path, service: &ServiceName) -> PathBuf {
    dir.join(format!("{}{}", sanitize_service_name(&service.0), SNAPSHOT_SUFFIX))
}

/// Persist the healthy subset of `instances`, replacing the previous snapshot.
///
/// Returns the path written and the number of records in it.
pub fn write_snapshot(
    dir: &Path,
    service: &ServiceName,
    instances: &[ServiceInstance],
    polled_at: DateTime<Local>,
) -> Result<(PathBuf, usize), SyncError> {
    let stamp = polled_at.format(SNAPSHOT_TIME_FORMAT).to_string();
    let records: Vec<InstanceRecord> = instances
        .iter()
        .filter(|i| i.healthy)
        .map(|i| InstanceRecord::from_instance(i, &stamp))
        .collect();

    let path = snapshot_path(dir, service);
    let json = serde_json::to_vec_pretty(&records)?;
    match atomic_write(&path, &json, None) {
        Ok(()) => {
            tracing::info!(
                "updated {} healthy instance(s) of {} in {}",
                records.len(),
                service,
                path.display()
            );
            Ok((path, records.len()))
        }
        Err(err) => {
            tracing::error!("failed to update snapshot for {}: {}", service, err);
            Err(err)
        }
    }
}

/// Read a snapshot previously written by [`write_snapshot`].
pub fn read_snapshot(path: &Path) -> Result<Vec<InstanceRecord>, SyncError> {
    let raw = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_slice(&raw)?)
}
