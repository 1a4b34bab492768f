//! Mapping file: connection settings plus data id → local file targets.
//!
//! # File layout
//!
//! ```text
//! nacos:
//!   server_addresses: "127.0.0.1:8848"
//!   namespace: ""            (optional)
//!   username: nacos          (optional)
//!   password: nacos          (optional)
//! config_mapping:
//!   <data_id>:
//!     group: DEFAULT_GROUP   (optional)
//!     file_path: /etc/app/db.yaml
//!     file_mode: 0644        (optional)
//! ```
//!
//! `file_mode` written as a string or with leading zeros (`0644`, `"0o600"`)
//! is read as octal; a YAML octal literal (`0o644`) or a plain integer is
//! taken as the raw permission value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::MappingError;
use crate::types::{DataId, MappingEntry, NacosSettings, DEFAULT_FILE_MODE, DEFAULT_GROUP};

/// Highest permission value accepted for `file_mode` (setuid/setgid/sticky + rwx).
const MAX_FILE_MODE: u32 = 0o7777;

/// Active data id → target mapping, ordered for deterministic reconcile logs.
pub type ConfigMapping = BTreeMap<DataId, MappingEntry>;

/// A fully parsed mapping file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFile {
    pub nacos: NacosSettings,
    pub config_mapping: ConfigMapping,
}

#[derive(Debug, Deserialize)]
struct RawMappingFile {
    nacos: NacosSettings,
    #[serde(default)]
    config_mapping: Option<BTreeMap<String, RawEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    group: Option<String>,
    file_path: PathBuf,
    #[serde(default)]
    file_mode: Option<RawMode>,
}

/// `file_mode` as written in the file, before octal interpretation.
#[derive(Debug)]
enum RawMode {
    Bits(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for RawMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModeVisitor;

        impl<'de> serde::de::Visitor<'de> for ModeVisitor {
            type Value = RawMode;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a permission mode such as 0644 or 0o644")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<RawMode, E> {
                Ok(RawMode::Bits(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<RawMode, E> {
                u64::try_from(v)
                    .map(RawMode::Bits)
                    .map_err(|_| E::custom(format!("negative file_mode {v}")))
            }

            // A leading-zero scalar can surface as a float; keep its digits as octal text.
            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<RawMode, E> {
                if v.fract() == 0.0 && v >= 0.0 {
                    Ok(RawMode::Text(format!("{}", v as u64)))
                } else {
                    Err(E::custom(format!("fractional file_mode {v}")))
                }
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<RawMode, E> {
                Ok(RawMode::Text(v.to_owned()))
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

impl RawMode {
    fn resolve(&self, data_id: &str) -> Result<u32, MappingError> {
        let invalid = |mode: String| MappingError::InvalidMode {
            data_id: data_id.to_owned(),
            mode,
        };
        let bits = match self {
            RawMode::Bits(bits) => *bits,
            RawMode::Text(text) => {
                let trimmed = text.trim();
                let digits = trimmed
                    .strip_prefix("0o")
                    .or_else(|| trimmed.strip_prefix("0O"))
                    .unwrap_or(trimmed);
                u64::from_str_radix(digits, 8).map_err(|_| invalid(text.clone()))?
            }
        };
        if bits > u64::from(MAX_FILE_MODE) {
            return Err(invalid(format!("{bits:o}")));
        }
        Ok(bits as u32)
    }
}

/// Load and validate the mapping file at `path`.
///
/// Returns `MappingError::Io` if unreadable, `MappingError::Parse` (with path
/// and line context) if malformed, `MappingError::InvalidMode` for a bad mode.
pub fn load_at(path: &Path) -> Result<MappingFile, MappingError> {
    let contents = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(path, &contents)
}

/// Parse mapping file `contents`; `path` is only used for error context.
pub fn parse_str(path: &Path, contents: &str) -> Result<MappingFile, MappingError> {
    let raw: RawMappingFile = serde_yaml::from_str(contents).map_err(|source| {
        MappingError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut config_mapping = ConfigMapping::new();
    for (data_id, entry) in raw.config_mapping.unwrap_or_default() {
        let file_mode = match &entry.file_mode {
            Some(mode) => mode.resolve(&data_id)?,
            None => DEFAULT_FILE_MODE,
        };
        config_mapping.insert(
            DataId::from(data_id),
            MappingEntry {
                group: entry.group.unwrap_or_else(|| DEFAULT_GROUP.to_owned()),
                file_path: entry.file_path,
                file_mode,
            },
        );
    }

    Ok(MappingFile {
        nacos: raw.nacos,
        config_mapping,
    })
}

// ---------------------------------------------------------------------------
// Reconcile planning
// ---------------------------------------------------------------------------

/// Difference between two mappings, expressed as watch actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingDiff {
    /// Present before, absent now: cancel the watch.
    pub removed: Vec<DataId>,
    /// Absent before, present now: subscribe and fetch.
    pub added: Vec<DataId>,
    /// Present in both with a different group: replace the watch and fetch.
    pub regrouped: Vec<DataId>,
    /// Same group in both: keep the watch untouched.
    pub unchanged: Vec<DataId>,
    /// Subset of `unchanged` whose file path or mode moved.
    pub retargeted: Vec<DataId>,
}

impl MappingDiff {
    /// Compare `old` against `new`. Output lists are sorted by data id.
    pub fn between(old: &ConfigMapping, new: &ConfigMapping) -> Self {
        let mut diff = MappingDiff::default();

        for data_id in old.keys() {
            if !new.contains_key(data_id) {
                diff.removed.push(data_id.clone());
            }
        }

        for (data_id, entry) in new {
            match old.get(data_id) {
                None => diff.added.push(data_id.clone()),
                Some(previous) if previous.group != entry.group => {
                    diff.regrouped.push(data_id.clone())
                }
                Some(previous) => {
                    if previous.file_path != entry.file_path
                        || previous.file_mode != entry.file_mode
                    {
                        diff.retargeted.push(data_id.clone());
                    }
                    diff.unchanged.push(data_id.clone());
                }
            }
        }

        diff
    }

    /// True when no watch has to be added, replaced or cancelled.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.regrouped.is_empty()
    }

    /// Data ids that need a fresh subscription and initial fetch.
    pub fn to_subscribe(&self) -> impl Iterator<Item = &DataId> {
        self.added.iter().chain(self.regrouped.iter())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<MappingFile, MappingError> {
        parse_str(Path::new("mapping.yaml"), yaml)
    }

    fn mapping(entries: &[(&str, &str)]) -> ConfigMapping {
        entries
            .iter()
            .map(|(id, group)| {
                (
                    DataId::from(*id),
                    MappingEntry::new(format!("/tmp/{id}")).with_group(*group),
                )
            })
            .collect()
    }

    #[test]
    fn defaults_apply_to_sparse_entries() {
        let file = parse(
            "nacos:\n  server_addresses: 127.0.0.1:8848\nconfig_mapping:\n  db.cfg:\n    file_path: /etc/app/db.yaml\n",
        )
        .expect("parse");
        let entry = &file.config_mapping[&DataId::from("db.cfg")];
        assert_eq!(entry.group, DEFAULT_GROUP);
        assert_eq!(entry.file_mode, 0o644);
        assert_eq!(entry.file_path, PathBuf::from("/etc/app/db.yaml"));
        assert_eq!(file.nacos.namespace, None);
    }

    #[test]
    fn leading_zero_mode_is_octal() {
        let file = parse(
            "nacos:\n  server_addresses: a:1\nconfig_mapping:\n  x:\n    file_path: /x\n    file_mode: 0600\n",
        )
        .expect("parse");
        assert_eq!(file.config_mapping[&DataId::from("x")].file_mode, 0o600);
    }

    #[test]
    fn yaml_octal_literal_mode() {
        let file = parse(
            "nacos:\n  server_addresses: a:1\nconfig_mapping:\n  x:\n    file_path: /x\n    file_mode: 0o640\n",
        )
        .expect("parse");
        assert_eq!(file.config_mapping[&DataId::from("x")].file_mode, 0o640);
    }

    #[test]
    fn out_of_range_mode_is_rejected() {
        let err = parse(
            "nacos:\n  server_addresses: a:1\nconfig_mapping:\n  x:\n    file_path: /x\n    file_mode: \"0o17777\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::InvalidMode { .. }), "got: {err}");
    }

    #[test]
    fn null_config_mapping_is_empty() {
        let file = parse("nacos:\n  server_addresses: a:1\nconfig_mapping:\n").expect("parse");
        assert!(file.config_mapping.is_empty());
    }

    #[test]
    fn missing_nacos_section_is_parse_error() {
        let err = parse("config_mapping: {}\n").unwrap_err();
        assert!(matches!(err, MappingError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("mapping.yaml"));
    }

    #[test]
    fn diff_classifies_every_identifier() {
        let old = mapping(&[("A", "g1"), ("B", "g1"), ("D", "g1")]);
        let new = mapping(&[("B", "g2"), ("C", "g1"), ("D", "g1")]);
        let diff = MappingDiff::between(&old, &new);

        assert_eq!(diff.removed, vec![DataId::from("A")]);
        assert_eq!(diff.added, vec![DataId::from("C")]);
        assert_eq!(diff.regrouped, vec![DataId::from("B")]);
        assert_eq!(diff.unchanged, vec![DataId::from("D")]);
        let subscribe: Vec<_> = diff.to_subscribe().cloned().collect();
        assert_eq!(subscribe, vec![DataId::from("C"), DataId::from("B")]);
    }

    #[test]
    fn diff_of_identical_mappings_is_noop() {
        let old = mapping(&[("A", "g1"), ("B", "g1")]);
        let diff = MappingDiff::between(&old, &old.clone());
        assert!(diff.is_noop());
        assert_eq!(diff.unchanged.len(), 2);
    }

    #[test]
    fn path_change_keeps_watch_but_is_reported() {
        let old = mapping(&[("A", "g1")]);
        let mut new = old.clone();
        new.get_mut(&DataId::from("A")).unwrap().file_path = PathBuf::from("/elsewhere");
        let diff = MappingDiff::between(&old, &new);
        assert!(diff.is_noop());
        assert_eq!(diff.retargeted, vec![DataId::from("A")]);
    }
}
