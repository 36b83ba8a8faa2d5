use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One normalized variable binding from a trap PDU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapVarbind {
    pub oid: String,
    /// Readable syntax name (`Integer`, `OctetString`, ...), if known.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: serde_json::Value,
}

/// A trap normalized for persistence, before attribution.
#[derive(Debug, Clone)]
pub struct IncomingTrap {
    pub source_host: String,
    pub source_port: u16,
    pub community: Option<String>,
    /// 0 = v1, 1 = v2c.
    pub version: i32,
    pub trap_oid: Option<String>,
    pub enterprise_oid: Option<String>,
    pub varbinds: Vec<TrapVarbind>,
}

/// Row shape as read from `snmp_traps`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrapRow {
    pub id: Uuid,
    pub transmitter_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_host: String,
    pub source_port: i32,
    pub community: Option<String>,
    pub version: i32,
    pub trap_oid: Option<String>,
    pub enterprise_oid: Option<String>,
    pub varbinds: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Wire form of a stored trap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trap {
    pub id: Uuid,
    pub transmitter_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_host: String,
    pub source_port: i32,
    pub community: Option<String>,
    pub version: i32,
    pub trap_oid: Option<String>,
    pub enterprise_oid: Option<String>,
    pub varbinds: Vec<TrapVarbind>,
    pub created_at: DateTime<Utc>,
}

impl From<TrapRow> for Trap {
    fn from(r: TrapRow) -> Self {
        let varbinds: Vec<TrapVarbind> = serde_json::from_value(r.varbinds).unwrap_or_default();
        Self {
            id: r.id,
            transmitter_id: r.transmitter_id,
            site_id: r.site_id,
            source_host: r.source_host,
            source_port: r.source_port,
            community: r.community,
            version: r.version,
            trap_oid: r.trap_oid,
            enterprise_oid: r.enterprise_oid,
            varbinds,
            created_at: r.created_at,
        }
    }
}

/// Filters shared by the trap query endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrapFilters {
    pub transmitter_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_host: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varbind_serializes_type_field_name() {
        let vb = TrapVarbind {
            oid: "1.3.6.1.6.3.1.1.4.1.0".into(),
            kind: Some("ObjectIdentifier".into()),
            value: serde_json::json!("1.3.6.1.6.3.1.1.5.3"),
        };
        let json = serde_json::to_value(&vb).unwrap();
        assert_eq!(json["type"], "ObjectIdentifier");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn trap_row_with_bad_varbind_json_degrades_to_empty() {
        let row = TrapRow {
            id: Uuid::new_v4(),
            transmitter_id: None,
            site_id: None,
            source_host: "10.0.0.9".into(),
            source_port: 53412,
            community: Some("public".into()),
            version: 1,
            trap_oid: Some("1.3.6.1.6.3.1.1.5.3".into()),
            enterprise_oid: None,
            varbinds: serde_json::json!({"oops": true}),
            created_at: Utc::now(),
        };
        let trap = Trap::from(row);
        assert!(trap.varbinds.is_empty());
    }
}
