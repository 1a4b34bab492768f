pub mod config_sync;
pub mod monitor;
pub mod register;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tether_core::{NacosSettings, DEFAULT_SERVER_ADDRESSES};
use tether_daemon::LogOptions;

/// Registry / config-center connection flags shared by `monitor` and `register`.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Comma-separated `host:port` list.
    #[arg(long, default_value = DEFAULT_SERVER_ADDRESSES)]
    pub server_addr: String,

    /// Namespace id; empty means the public namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, requires = "username")]
    pub password: Option<String>,
}

impl ConnectionArgs {
    pub fn settings(&self) -> NacosSettings {
        NacosSettings {
            server_addresses: self.server_addr.clone(),
            namespace: self.namespace.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Log destination flags.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Append logs to this file as well as stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log to stderr only.
    #[arg(long, conflicts_with = "log_file")]
    pub no_log_file: bool,

    /// Write the log file as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl LogArgs {
    /// Resolve against the agent's default log path.
    pub fn options(&self, default_path: PathBuf) -> LogOptions {
        let file = if self.no_log_file {
            None
        } else {
            Some(self.log_file.clone().unwrap_or(default_path))
        };
        LogOptions {
            file,
            json: self.log_json,
        }
    }
}

/// Parse a `key=value` pair.
pub fn parse_key_value(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => bail!("expected key=value, got '{raw}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs_split_on_first_equals() {
        assert_eq!(
            parse_key_value("version=1.0").unwrap(),
            ("version".to_owned(), "1.0".to_owned())
        );
        assert_eq!(
            parse_key_value("url=http://a?b=c").unwrap(),
            ("url".to_owned(), "http://a?b=c".to_owned())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn log_file_defaults_and_opt_out() {
        let args = LogArgs {
            log_file: None,
            no_log_file: false,
            log_json: false,
        };
        assert_eq!(
            args.options(PathBuf::from("log/a.log")).file,
            Some(PathBuf::from("log/a.log"))
        );

        let args = LogArgs {
            no_log_file: true,
            ..args
        };
        assert_eq!(args.options(PathBuf::from("log/a.log")).file, None);
    }
}
