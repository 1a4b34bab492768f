//! `tether monitor` — persist the healthy instances of one service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tether_client::{HttpConnector, HttpOptions};
use tether_core::ServiceName;
use tether_daemon::{paths, run_monitor, start_blocking, MonitorOptions, RetryPolicy};

use super::{ConnectionArgs, LogArgs};

/// Arguments for `tether monitor`.
#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Service to watch.
    #[arg(long, default_value = paths::DEFAULT_SERVICE)]
    pub service: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Directory receiving `<service>_ips.json`.
    #[arg(long, default_value = paths::SNAPSHOT_DIR)]
    pub output_dir: PathBuf,

    /// Seconds between polls.
    #[arg(long, default_value_t = paths::POLL_INTERVAL.as_secs())]
    pub interval_secs: u64,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = paths::MAX_RETRY)]
    pub max_retry: u32,

    /// Seconds between connection attempts.
    #[arg(long, default_value_t = paths::RETRY_DELAY.as_secs())]
    pub retry_delay_secs: u64,

    #[command(flatten)]
    pub log: LogArgs,
}

impl MonitorArgs {
    pub fn run(self) -> Result<()> {
        let log = self.log.options(paths::monitor_log_path());
        let options = MonitorOptions {
            service: ServiceName::from(self.service.as_str()),
            settings: self.connection.settings(),
            output_dir: self.output_dir.clone(),
            interval: Duration::from_secs(self.interval_secs.max(1)),
            retry: RetryPolicy::new(self.max_retry, Duration::from_secs(self.retry_delay_secs)),
            log_file: log.file.clone(),
        };
        let connector = Arc::new(HttpConnector::new(HttpOptions::default()));

        start_blocking(&log, run_monitor(options, connector))
            .with_context(|| format!("monitor failed for service '{}'", self.service))
    }
}
