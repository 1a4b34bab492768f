//! # tether-sync
//!
//! Atomic file writes and the monitor's instance snapshot format.
//!
//! [`write_config`] lands remote config content on disk with the configured
//! permission bits; [`write_snapshot`] persists the healthy instances of one
//! service as `<dir>/<service>_ips.json`. Both go through [`atomic_write`],
//! so a reader never observes a partially written file.

pub mod error;
pub mod snapshot;
pub mod writer;

pub use error::SyncError;
pub use snapshot::{
    read_snapshot, sanitize_service_name, snapshot_path, write_snapshot, InstanceRecord,
    SNAPSHOT_TIME_FORMAT,
};
pub use writer::{atomic_write, write_config};
