use std::path::PathBuf;
use std::time::Duration;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const LOG_DIR: &str = "log";
pub const CONFIG_SYNC_LOG: &str = "tether_config_sync.log";
pub const MONITOR_LOG: &str = "tether_monitor.log";
pub const REGISTRAR_LOG: &str = "tether_register.log";

pub const SNAPSHOT_DIR: &str = "service_ips";
pub const DEFAULT_SERVICE: &str = "python-service";

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_RETRY: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

pub const REGISTRAR_IP: &str = "127.0.0.1";
pub const REGISTRAR_PORT: u16 = 4000;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub fn config_sync_log_path() -> PathBuf {
    PathBuf::from(LOG_DIR).join(CONFIG_SYNC_LOG)
}

pub fn monitor_log_path() -> PathBuf {
    PathBuf::from(LOG_DIR).join(MONITOR_LOG)
}

pub fn registrar_log_path() -> PathBuf {
    PathBuf::from(LOG_DIR).join(REGISTRAR_LOG)
}

pub fn snapshot_dir() -> PathBuf {
    PathBuf::from(SNAPSHOT_DIR)
}
