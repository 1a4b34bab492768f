//! `tether config-sync` — mirror remote configs listed in a mapping file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tether_client::{HttpConnector, HttpOptions};
use tether_daemon::{paths, run_config_sync, start_blocking, ConfigSyncOptions};

use super::LogArgs;

/// Arguments for `tether config-sync`.
#[derive(Args, Debug)]
pub struct ConfigSyncArgs {
    /// Mapping file (YAML) naming the server and the configs to mirror.
    pub mapping: PathBuf,

    #[command(flatten)]
    pub log: LogArgs,
}

impl ConfigSyncArgs {
    pub fn run(self) -> Result<()> {
        let log = self.log.options(paths::config_sync_log_path());
        let options = ConfigSyncOptions {
            log_file: log.file.clone(),
            ..ConfigSyncOptions::default()
        };
        let connector = Arc::new(HttpConnector::new(HttpOptions::default()));
        let mapping = self.mapping.clone();

        start_blocking(&log, run_config_sync(mapping, connector, options))
            .with_context(|| format!("config sync failed for '{}'", self.mapping.display()))
    }
}
