//! OID-to-name resolution from local MIB mapping files.
//!
//! Mapping files are flat JSON: `{ "oids": { "1.3.6.1...": "name" } }`.
//! Lookups strip a single trailing instance component (including the scalar
//! `.0`) before consulting the map. No I/O happens after load.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::oid::strip_instance;

#[derive(Debug, Deserialize)]
struct MibFile {
    #[serde(default)]
    oids: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MibMapper {
    names: HashMap<String, String>,
}

impl MibMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper preloaded with the Elenos ETG family and the handful of
    /// SNMPv2-MIB scalars the dashboards reference.
    pub fn with_builtin() -> Self {
        let mut mapper = Self::new();
        for (oid, name) in [
            ("1.3.6.1.2.1.1.1", "sysDescr"),
            ("1.3.6.1.2.1.1.3", "sysUpTime"),
            ("1.3.6.1.2.1.1.5", "sysName"),
            ("1.3.6.1.4.1.31946.3.1.7", "etgRadioName"),
            ("1.3.6.1.4.1.31946.4.2.6.10.1", "etgForwardPower"),
            ("1.3.6.1.4.1.31946.4.2.6.10.2", "etgReflectedPower"),
            ("1.3.6.1.4.1.31946.4.2.6.10.12", "etgOnAirStatus"),
            ("1.3.6.1.4.1.31946.4.2.6.10.13", "etgStandbyStatus"),
            ("1.3.6.1.4.1.31946.4.2.6.10.14", "etgFrequency"),
        ] {
            mapper.names.insert(oid.to_string(), name.to_string());
        }
        mapper
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read MIB file {}", path.display()))?;
        self.load_json(&content)
            .with_context(|| format!("failed to parse MIB file {}", path.display()))
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let file: MibFile = serde_json::from_str(json).context("invalid MIB JSON")?;
        for (oid, name) in file.oids {
            self.names.insert(oid.trim().trim_start_matches('.').to_string(), name);
        }
        Ok(())
    }

    /// Symbolic name for an OID, instance suffix stripped.
    pub fn map(&self, oid: &str) -> Option<&str> {
        if let Some(name) = self.names.get(oid) {
            return Some(name);
        }
        self.names.get(strip_instance(oid)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
