//! Domain types shared by the tether agents.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Wire-facing structs deserialize from the registry's camelCase JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Group used when a mapping entry does not name one.
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Permission bits applied to synced config files when none are configured.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Instance weight assumed when the registry omits it.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Server list used when nothing else is configured.
pub const DEFAULT_SERVER_ADDRESSES: &str = "127.0.0.1:8848";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed config identifier ("data id") in the config center.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataId(pub String);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DataId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DataId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name of a service in the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Config center
// ---------------------------------------------------------------------------

/// Identity of one remote watch: a data id inside a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigKey {
    pub data_id: DataId,
    pub group: String,
}

impl ConfigKey {
    pub fn new(data_id: impl Into<DataId>, group: impl Into<String>) -> Self {
        Self {
            data_id: data_id.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.data_id, self.group)
    }
}

/// Connection parameters for the registry / config center.
///
/// Compared by value: a reload that changes any field forces a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NacosSettings {
    /// Comma-separated `host:port` list, optionally with a scheme.
    pub server_addresses: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NacosSettings {
    pub fn new(server_addresses: impl Into<String>) -> Self {
        Self {
            server_addresses: server_addresses.into(),
            namespace: None,
            username: None,
            password: None,
        }
    }

    /// Individual server addresses, trimmed, empty segments dropped.
    pub fn servers(&self) -> Vec<String> {
        self.server_addresses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Namespace to send on the wire; an empty string means the public namespace.
    pub fn namespace_id(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Username/password pair, only when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl Default for NacosSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_ADDRESSES)
    }
}

/// Where one remote config is written locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub group: String,
    pub file_path: PathBuf,
    pub file_mode: u32,
}

impl MappingEntry {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            group: DEFAULT_GROUP.to_owned(),
            file_path: file_path.into(),
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn key(&self, data_id: &DataId) -> ConfigKey {
        ConfigKey::new(data_id.clone(), self.group.clone())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One instance of a service as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceInstance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight: DEFAULT_WEIGHT,
            healthy: true,
            ephemeral: true,
            cluster_name: None,
            instance_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

/// The instance a registrar announces for its own process.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRegistration {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    pub cluster_name: String,
    pub ephemeral: bool,
}

impl InstanceRegistration {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight: DEFAULT_WEIGHT,
            metadata: BTreeMap::new(),
            cluster_name: "DEFAULT".to_owned(),
            ephemeral: true,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(DataId::from("db.cfg").to_string(), "db.cfg");
        assert_eq!(ServiceName::from("orders").to_string(), "orders");
        assert_eq!(ConfigKey::new("db.cfg", "G1").to_string(), "db.cfg@G1");
    }

    #[test]
    fn settings_split_server_list() {
        let settings = NacosSettings::new(" 10.0.0.1:8848, ,10.0.0.2:8848 ");
        assert_eq!(settings.servers(), vec!["10.0.0.1:8848", "10.0.0.2:8848"]);
    }

    #[test]
    fn empty_namespace_means_public() {
        let mut settings = NacosSettings::default();
        settings.namespace = Some(String::new());
        assert_eq!(settings.namespace_id(), None);
        settings.namespace = Some("dev".into());
        assert_eq!(settings.namespace_id(), Some("dev"));
    }

    #[test]
    fn credentials_require_both_parts() {
        let mut settings = NacosSettings::default();
        settings.username = Some("nacos".into());
        assert!(settings.credentials().is_none());
        settings.password = Some("secret".into());
        assert_eq!(settings.credentials(), Some(("nacos", "secret")));
    }

    #[test]
    fn instance_defaults_when_fields_absent() {
        // Flow-style YAML doubles as the registry's JSON shape.
        let instance: ServiceInstance =
            serde_yaml::from_str(r#"{"ip":"10.1.1.1","port":8080}"#).expect("parse");
        assert_eq!(instance.weight, DEFAULT_WEIGHT);
        assert!(!instance.healthy);
        assert!(instance.metadata.is_empty());
    }

    #[test]
    fn instance_reads_camel_case_fields() {
        let yaml = "ip: 10.1.1.2\nport: 9000\nhealthy: true\nclusterName: DEFAULT\ninstanceId: abc\n";
        let instance: ServiceInstance = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(instance.cluster_name.as_deref(), Some("DEFAULT"));
        assert_eq!(instance.instance_id.as_deref(), Some("abc"));
        assert!(instance.healthy);
    }
}
