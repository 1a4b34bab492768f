//! `tether register` — announce this instance and keep it alive until signalled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tether_client::{HttpConnector, HttpOptions};
use tether_core::{InstanceRegistration, ServiceName};
use tether_daemon::{paths, start_blocking, DaemonError, Registrar, RegistrarOptions, RetryPolicy};

use super::{parse_key_value, ConnectionArgs, LogArgs};

/// Arguments for `tether register`.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Service to register under.
    #[arg(long, default_value = paths::DEFAULT_SERVICE)]
    pub service: String,

    /// Address announced to the registry.
    #[arg(long, default_value = paths::REGISTRAR_IP)]
    pub ip: String,

    #[arg(long, default_value_t = paths::REGISTRAR_PORT)]
    pub port: u16,

    #[arg(long, default_value_t = 1.0)]
    pub weight: f64,

    /// Instance metadata as `key=value`; repeatable. Defaults to `version=1.0`.
    #[arg(long = "metadata", value_parser = parse_metadata)]
    pub metadata: Vec<(String, String)>,

    /// Seconds between heartbeats.
    #[arg(long, default_value_t = paths::HEARTBEAT_INTERVAL.as_secs())]
    pub heartbeat_secs: u64,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

fn parse_metadata(raw: &str) -> Result<(String, String), String> {
    parse_key_value(raw).map_err(|e| e.to_string())
}

impl RegisterArgs {
    fn options(&self) -> RegistrarOptions {
        let mut instance =
            InstanceRegistration::new(self.ip.clone(), self.port).with_weight(self.weight);
        if self.metadata.is_empty() {
            instance = instance.with_metadata("version", "1.0");
        }
        for (key, value) in &self.metadata {
            instance = instance.with_metadata(key.clone(), value.clone());
        }
        RegistrarOptions {
            service: ServiceName::from(self.service.as_str()),
            settings: self.connection.settings(),
            instance,
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            retry: RetryPolicy::default(),
            log_file: None,
        }
    }

    pub fn run(self) -> Result<()> {
        let log = self.log.options(paths::registrar_log_path());
        let options = RegistrarOptions {
            log_file: log.file.clone(),
            ..self.options()
        };
        let connector = Arc::new(HttpConnector::new(HttpOptions::default()));

        start_blocking(&log, async move {
            let registrar = Registrar::connect(&options, connector).await?;
            registrar.register().await?;
            println!(
                "service {} registered at {}:{}",
                options.service, options.instance.ip, options.instance.port
            );
            registrar
                .serve_until_signal(options.heartbeat, options.log_file.clone())
                .await?;
            println!("service {} deregistered", options.service);
            Ok::<(), DaemonError>(())
        })
        .with_context(|| format!("registration failed for service '{}'", self.service))
    }
}
