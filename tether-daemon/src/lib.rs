//! Agent runtimes: config-sync daemon, instance monitor, instance registrar.

pub mod config_sync;
mod error;
pub mod log_rotation;
pub mod logging;
pub mod monitor;
pub mod paths;
pub mod registrar;
pub mod retry;
mod runtime;
mod tasks;

pub use config_sync::{ConfigSync, EventSink, ReconcileReport, SyncEvent, WatcherRegistration};
pub use error::DaemonError;
pub use logging::{init_tracing, LogOptions};
pub use monitor::{run_monitor, run_monitor_until, InstanceMonitor, MonitorOptions, PollOutcome};
pub use registrar::{Registrar, RegistrarOptions};
pub use retry::{with_retry, RetryPolicy};
pub use runtime::{run_config_sync, run_config_sync_until, start_blocking, ConfigSyncOptions};
