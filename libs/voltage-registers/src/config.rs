//! Device register tables
//!
//! A register table is plain data: a device name, poll settings and a list of
//! named register entries. Tables load from YAML, TOML or JSON through figment
//! and are validated before use.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use figment::{
    providers::{Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::{DataKind, RegisterReference, WordOrder};
use crate::error::{RegisterError, Result};
use crate::poll::{PollPlan, ReadKind, DEFAULT_MAX_SPAN, MAX_READ_REGISTERS};
use crate::range::AddressRangeSet;

/// Largest power of ten an `i128` mantissa can carry
pub const MAX_SCALE: i32 = 38;

fn default_max_span() -> usize {
    DEFAULT_MAX_SPAN
}

fn default_sentinel() -> bool {
    true
}

/// How a device is polled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollConfig {
    #[serde(default)]
    pub read_kind: ReadKind,
    /// Maximum registers per read request
    #[serde(default = "default_max_span")]
    pub max_span: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            read_kind: ReadKind::default(),
            max_span: DEFAULT_MAX_SPAN,
        }
    }
}

/// One named field of a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterEntry {
    pub name: String,
    pub address: u16,
    pub kind: DataKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,
    #[serde(default)]
    pub word_order: WordOrder,
    #[serde(default = "default_sentinel")]
    pub sentinel: bool,
    /// Power of ten applied to numeric values
    #[serde(default)]
    pub scale: i32,
    /// Poll group, e.g. `info` for registers read once at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl RegisterEntry {
    pub fn reference(&self) -> RegisterReference {
        RegisterReference {
            address: self.address,
            kind: self.kind,
            length: self.length,
            word_order: self.word_order,
            sentinel: self.sentinel,
        }
    }

    fn in_group(&self, group: Option<&str>) -> bool {
        match group {
            Some(g) => self.group.as_deref() == Some(g),
            None => true,
        }
    }
}

/// Register layout of one device model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterTable {
    pub name: String,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub registers: Vec<RegisterEntry>,
}

impl RegisterTable {
    /// Load and validate a table, picking the format from the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| RegisterError::config("Register table file must have an extension"))?;
        if !path.exists() {
            return Err(RegisterError::config(format!(
                "Register table not found: {}",
                path.display()
            )));
        }

        let figment = match extension {
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            "json" => Figment::new().merge(Json::file(path)),
            _ => {
                return Err(RegisterError::config(format!(
                    "Unsupported register table format: {}",
                    extension
                )))
            },
        };

        let table: Self = figment.extract().map_err(|e| {
            RegisterError::config(format!(
                "Failed to load register table {}: {}",
                path.display(),
                e
            ))
        })?;
        table.validate()?;
        debug!(
            "Loaded register table '{}' with {} registers from {}",
            table.name,
            table.registers.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse and validate a YAML table
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let table: Self = Figment::new().merge(Yaml::string(yaml)).extract()?;
        table.validate()?;
        Ok(table)
    }

    /// Check names, lengths, address bounds and poll limits
    pub fn validate(&self) -> Result<()> {
        if self.poll.max_span == 0 || self.poll.max_span > MAX_READ_REGISTERS {
            return Err(RegisterError::config(format!(
                "{}: max_span must be between 1 and {}, got {}",
                self.name, MAX_READ_REGISTERS, self.poll.max_span
            )));
        }

        let mut names = HashSet::with_capacity(self.registers.len());
        for entry in &self.registers {
            if !names.insert(entry.name.as_str()) {
                return Err(RegisterError::config(format!(
                    "{}: duplicate register name '{}'",
                    self.name, entry.name
                )));
            }

            match (entry.kind.is_variable_length(), entry.length) {
                (true, Some(0)) => {
                    return Err(RegisterError::config(format!(
                        "{}: register '{}' has zero length",
                        self.name, entry.name
                    )))
                },
                (true, None) if entry.kind != DataKind::Bitmask => {
                    return Err(RegisterError::config(format!(
                        "{}: {} register '{}' needs a length",
                        self.name, entry.kind, entry.name
                    )))
                },
                (false, Some(len)) if len != entry.kind.default_length() => {
                    return Err(RegisterError::config(format!(
                        "{}: {} register '{}' is {} words, not {}",
                        self.name,
                        entry.kind,
                        entry.name,
                        entry.kind.default_length(),
                        len
                    )))
                },
                _ => {},
            }

            if entry.scale.unsigned_abs() > MAX_SCALE as u32 {
                return Err(RegisterError::config(format!(
                    "{}: register '{}' scale {} is outside -{}..={}",
                    self.name, entry.name, entry.scale, MAX_SCALE, MAX_SCALE
                )));
            }

            entry.reference().range().map_err(|e| {
                RegisterError::config(format!("{}: register '{}': {}", self.name, entry.name, e))
            })?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisterEntry> {
        self.registers.iter().find(|e| e.name == name)
    }

    /// Entries in `group`, or every entry when `group` is `None`
    pub fn entries<'a>(&'a self, group: Option<&'a str>) -> impl Iterator<Item = &'a RegisterEntry> {
        self.registers.iter().filter(move |e| e.in_group(group))
    }

    /// Distinct group names
    pub fn groups(&self) -> BTreeSet<&str> {
        self.registers
            .iter()
            .filter_map(|e| e.group.as_deref())
            .collect()
    }

    /// Every register address used by entries in `group`
    pub fn address_set(&self, group: Option<&str>) -> Result<AddressRangeSet> {
        let mut set = AddressRangeSet::new();
        for entry in self.entries(group) {
            set.add_range(entry.reference().range()?);
        }
        Ok(set)
    }

    /// Read plan for `group` using the table's poll settings
    pub fn poll_plan(&self, group: Option<&str>) -> Result<PollPlan> {
        self.poll_plan_with_span(group, self.poll.max_span)
    }

    /// Read plan for `group` with an explicit span limit
    pub fn poll_plan_with_span(&self, group: Option<&str>, max_span: usize) -> Result<PollPlan> {
        PollPlan::new(self.poll.read_kind, &self.address_set(group)?, max_span)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const SAMPLE: &str = r#"
name: sample-inverter
poll:
  read_kind: input
registers:
  - name: serial_number
    address: 30057
    kind: uint32
    group: info
  - name: model
    address: 30000
    kind: ascii
    length: 8
    group: info
  - name: active_power
    address: 30775
    kind: int32
    scale: -3
    unit: W
  - name: grid_frequency
    address: 30803
    kind: uint32
    scale: -2
    word_order: least_to_most_significant
"#;

    // ========== parsing tests ==========

    #[test]
    fn test_parse_yaml_with_defaults() {
        let table = RegisterTable::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(table.name, "sample-inverter");
        assert_eq!(table.poll.read_kind, ReadKind::Input);
        assert_eq!(table.poll.max_span, DEFAULT_MAX_SPAN);
        assert_eq!(table.registers.len(), 4);

        let power = table.get("active_power").unwrap();
        assert_eq!(power.scale, -3);
        assert_eq!(power.unit.as_deref(), Some("W"));
        assert!(power.sentinel);
        assert_eq!(
            power.reference(),
            RegisterReference::new(30775, DataKind::Int32)
        );
        assert_eq!(
            table.get("grid_frequency").unwrap().word_order,
            WordOrder::LeastToMostSignificant
        );
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_groups_and_entries() {
        let table = RegisterTable::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(table.groups().into_iter().collect::<Vec<_>>(), vec!["info"]);
        assert_eq!(table.entries(Some("info")).count(), 2);
        assert_eq!(table.entries(None).count(), 4);
    }

    #[test]
    fn test_address_set_and_plan() {
        let table = RegisterTable::from_yaml_str(SAMPLE).unwrap();

        let info = table.address_set(Some("info")).unwrap();
        assert_eq!(info.to_string(), "[30000-30007, 30057-30058]");

        let plan = table.poll_plan(Some("info")).unwrap();
        assert_eq!(plan.kind(), ReadKind::Input);
        assert_eq!(plan.ranges().to_string(), "[30000-30058]");

        let plan = table.poll_plan_with_span(None, 10).unwrap();
        assert_eq!(
            plan.ranges().to_string(),
            "[30000-30007, 30057-30058, 30775-30776, 30803-30804]"
        );
    }

    // ========== validation tests ==========

    #[test]
    fn test_duplicate_name_rejected() {
        let yaml = r#"
name: dup
registers:
  - { name: a, address: 1, kind: uint16 }
  - { name: a, address: 2, kind: uint16 }
"#;
        let err = RegisterTable::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate register name 'a'"));
    }

    #[test]
    fn test_string_needs_length() {
        let yaml = "name: t\nregisters:\n  - { name: s, address: 1, kind: ascii }\n";
        let err = RegisterTable::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("needs a length"));

        let yaml = "name: t\nregisters:\n  - { name: s, address: 1, kind: ascii, length: 0 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_fixed_kind_length_mismatch_rejected() {
        let yaml = "name: t\nregisters:\n  - { name: p, address: 1, kind: int32, length: 1 }\n";
        let err = RegisterTable::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("is 2 words, not 1"));
    }

    #[test]
    fn test_register_past_last_address_rejected() {
        let yaml = "name: t\nregisters:\n  - { name: e, address: 65535, kind: uint32 }\n";
        let err = RegisterTable::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, RegisterError::Config(_)));
    }

    #[test]
    fn test_scale_bounds() {
        let yaml = "name: t\nregisters:\n  - { name: f, address: 0, kind: float32, scale: 2147483647 }\n";
        let err = RegisterTable::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("scale 2147483647 is outside -38..=38"));

        let yaml = "name: t\nregisters:\n  - { name: f, address: 0, kind: int16, scale: -39 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_err());

        let yaml = "name: t\nregisters:\n  - { name: f, address: 0, kind: int16, scale: -38 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_ok());
    }

    #[test]
    fn test_max_span_bounds() {
        let yaml = "name: t\npoll: { max_span: 0 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_err());
        let yaml = "name: t\npoll: { max_span: 126 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_err());
        let yaml = "name: t\npoll: { max_span: 125 }\n";
        assert!(RegisterTable::from_yaml_str(yaml).is_ok());
    }

    // ========== file loading tests ==========

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_yaml_file() {
        let file = write_temp(".yaml", SAMPLE);
        let table = RegisterTable::from_file(file.path()).unwrap();
        assert_eq!(table.registers.len(), 4);
    }

    #[test]
    fn test_from_toml_file() {
        let toml = r#"
name = "meter"

[poll]
max_span = 32

[[registers]]
name = "voltage_a"
address = 100
kind = "uint16"
scale = -1
"#;
        let file = write_temp(".toml", toml);
        let table = RegisterTable::from_file(file.path()).unwrap();
        assert_eq!(table.poll.max_span, 32);
        assert_eq!(table.poll.read_kind, ReadKind::Holding);
        assert_eq!(table.get("voltage_a").unwrap().scale, -1);
    }

    #[test]
    fn test_from_json_file() {
        let json = serde_json::json!({
            "name": "meter",
            "registers": [{ "name": "energy", "address": 200, "kind": "uint64" }]
        });
        let file = write_temp(".json", &json.to_string());
        let table = RegisterTable::from_file(file.path()).unwrap();
        assert_eq!(table.get("energy").unwrap().reference().word_length(), 4);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".ini", "name = x");
        let err = RegisterTable::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported register table format: ini"));
    }

    #[test]
    fn test_missing_file() {
        let err = RegisterTable::from_file("/nonexistent/table.yaml").unwrap_err();
        assert!(matches!(err, RegisterError::Config(_)));
    }
}
