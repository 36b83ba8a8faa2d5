//! Device template generation from walk results, with a parser for
//! `snmpwalk`-style dump files used when the live walk fails.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::mib::MibMapper;
use crate::oid::{elenos_base_of, is_valid_oid};
use crate::snmp::Varbind;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntry {
    pub oid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTemplate {
    pub name: String,
    pub generated_at: String,
    /// `walk` for a live device, `dump` when built from a walk dump file.
    pub source: String,
    /// OID bases worth configuring for polling, deduplicated.
    pub poll_oids: Vec<String>,
    pub entries: Vec<TemplateEntry>,
}

pub fn template_from_varbinds(name: &str, source: &str, varbinds: &[Varbind], mib: &MibMapper) -> DeviceTemplate {
    let entries: Vec<TemplateEntry> = varbinds
        .iter()
        .map(|vb| TemplateEntry {
            oid: vb.oid.clone(),
            name: mib.map(&vb.oid).map(str::to_string),
            kind: vb.kind.clone(),
            value: serde_json::to_value(&vb.value).unwrap_or(serde_json::Value::Null),
        })
        .collect();
    let poll_oids = recommend_poll_oids(entries.iter().map(|e| e.oid.as_str()));
    DeviceTemplate {
        name: name.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        source: source.to_string(),
        poll_oids,
        entries,
    }
}

/// Parse `snmpwalk -On` style output: `<oid> = <TYPE>: <value>` per line.
/// Unrecognized lines are skipped.
pub fn parse_walk_dump(text: &str) -> Vec<TemplateEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some((oid_part, rest)) = line.split_once(" = ") else {
            continue;
        };
        let oid = oid_part.trim().trim_start_matches('.').to_string();
        if !is_valid_oid(&oid) {
            continue;
        }
        let (kind, value_text) = match rest.split_once(':') {
            Some((k, v)) => (k.trim().to_string(), v.trim()),
            // e.g. `= ""` with no type tag
            None => ("STRING".to_string(), rest.trim()),
        };
        let value_text = value_text.trim_matches('"');
        let value = match value_text.parse::<i64>() {
            Ok(n) => serde_json::json!(n),
            Err(_) => serde_json::json!(value_text),
        };
        entries.push(TemplateEntry {
            oid,
            name: None,
            kind,
            value,
        });
    }
    entries
}

pub fn template_from_dump(name: &str, text: &str, mib: &MibMapper) -> DeviceTemplate {
    let mut entries = parse_walk_dump(text);
    for entry in &mut entries {
        entry.name = mib.map(&entry.oid).map(str::to_string);
    }
    let poll_oids = recommend_poll_oids(entries.iter().map(|e| e.oid.as_str()));
    DeviceTemplate {
        name: name.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        source: "dump".to_string(),
        poll_oids,
        entries,
    }
}

/// Elenos measurement bases observed in the walk, in first-seen order.
fn recommend_poll_oids<'a>(oids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for oid in oids {
        if let Some(base) = elenos_base_of(oid) {
            if !out.contains(&base) {
                out.push(base);
            }
        }
    }
    out
}

/// Write the template under the assets directory, returning the path.
pub fn persist_template(assets_dir: &Path, template: &DeviceTemplate) -> Result<PathBuf> {
    let dir = assets_dir.join("templates");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let slug: String = template
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let path = dir.join(format!(
        "{slug}-{}.json",
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    let json = serde_json::to_string_pretty(template)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metric::RawValue;

    #[test]
    fn walk_dump_parses_numeric_lines() {
        let dump = "\
.1.3.6.1.4.1.31946.4.2.6.10.1.0 = INTEGER: 500
.1.3.6.1.4.1.31946.4.2.6.10.14.0 = INTEGER: 9580
.1.3.6.1.2.1.1.5.0 = STRING: \"WXYZ-FM\"
garbage line without separator
SNMPv2-MIB::sysDescr.0 = STRING: not numeric oid
";
        let entries = parse_walk_dump(dump);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].oid, "1.3.6.1.4.1.31946.4.2.6.10.1.0");
        assert_eq!(entries[0].kind, "INTEGER");
        assert_eq!(entries[0].value, serde_json::json!(500));
        assert_eq!(entries[2].value, serde_json::json!("WXYZ-FM"));
    }

    #[test]
    fn dump_template_recommends_elenos_bases() {
        let dump = "\
.1.3.6.1.4.1.31946.4.2.6.10.1.0 = INTEGER: 500
.1.3.6.1.4.1.31946.4.2.6.10.1.1 = INTEGER: 480
.1.3.6.1.4.1.31946.4.2.6.10.14.0 = INTEGER: 9580
.1.3.6.1.2.1.1.3.0 = Timeticks: 12345
";
        let mib = MibMapper::with_builtin();
        let template = template_from_dump("etg-1000", dump, &mib);
        assert_eq!(template.source, "dump");
        assert_eq!(
            template.poll_oids,
            vec![
                "1.3.6.1.4.1.31946.4.2.6.10.1".to_string(),
                "1.3.6.1.4.1.31946.4.2.6.10.14".to_string(),
            ]
        );
        assert_eq!(
            template.entries[0].name.as_deref(),
            Some("etgForwardPower")
        );
    }

    #[test]
    fn live_template_carries_varbind_values() {
        let varbinds = vec![Varbind {
            oid: "1.3.6.1.4.1.31946.4.2.6.10.2.0".into(),
            kind: "Integer".into(),
            value: RawValue::Int(12),
        }];
        let mib = MibMapper::with_builtin();
        let template = template_from_varbinds("probe", "walk", &varbinds, &mib);
        assert_eq!(template.entries.len(), 1);
        assert_eq!(
            template.entries[0].name.as_deref(),
            Some("etgReflectedPower")
        );
        assert_eq!(template.entries[0].value, serde_json::json!(12));
        assert_eq!(template.poll_oids, vec!["1.3.6.1.4.1.31946.4.2.6.10.2".to_string()]);
    }

    #[test]
    fn template_persists_under_templates_dir() {
        let dir = std::env::temp_dir().join(format!("txfleet-test-{}", uuid::Uuid::new_v4()));
        let template = template_from_dump("ETG 1000", "", &MibMapper::new());
        let path = persist_template(&dir, &template).unwrap();
        assert!(path.starts_with(dir.join("templates")));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"source\": \"dump\""));
        std::fs::remove_dir_all(&dir).ok();
    }
}
