use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row shape as read from `transmitters`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransmitterRow {
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub display_label: Option<String>,
    pub display_order: i32,
    pub frequency_mhz: Option<f64>,
    pub power_watts: Option<f64>,
    pub status: String,
    pub snmp_host: String,
    pub snmp_port: i32,
    pub snmp_community: String,
    pub snmp_version: i32,
    pub oids: serde_json::Value,
    pub poll_interval: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A polled SNMP endpoint and its presentation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transmitter {
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub display_label: Option<String>,
    pub display_order: i32,
    pub frequency_mhz: Option<f64>,
    pub power_watts: Option<f64>,
    pub status: String,
    pub snmp_host: String,
    pub snmp_port: i32,
    pub snmp_community: String,
    /// 0 = SNMPv1, 1 = SNMPv2c.
    pub snmp_version: i32,
    pub oids: Vec<String>,
    /// Milliseconds between polls.
    pub poll_interval: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransmitterRow> for Transmitter {
    fn from(r: TransmitterRow) -> Self {
        let oids: Vec<String> = serde_json::from_value(r.oids).unwrap_or_default();
        Self {
            id: r.id,
            site_id: r.site_id,
            name: r.name,
            display_label: r.display_label,
            display_order: r.display_order,
            frequency_mhz: r.frequency_mhz,
            power_watts: r.power_watts,
            status: r.status,
            snmp_host: r.snmp_host,
            snmp_port: r.snmp_port,
            snmp_community: r.snmp_community,
            snmp_version: r.snmp_version,
            oids,
            poll_interval: r.poll_interval,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Wire projection consumed by the `/api/snmp/devices` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub id: Uuid,
    pub host: String,
    pub port: i32,
    pub community: String,
    pub version: i32,
    pub oids: Vec<String>,
    pub poll_interval: i32,
    pub is_active: bool,
    pub name: String,
    pub label: Option<String>,
    pub display_order: i32,
    pub site_id: Uuid,
}

impl From<Transmitter> for DeviceView {
    fn from(t: Transmitter) -> Self {
        Self {
            id: t.id,
            host: t.snmp_host,
            port: t.snmp_port,
            community: t.snmp_community,
            version: t.snmp_version,
            oids: t.oids,
            poll_interval: t.poll_interval,
            is_active: t.is_active,
            name: t.name,
            label: t.display_label,
            display_order: t.display_order,
            site_id: t.site_id,
        }
    }
}

/// Partial payload for insert-or-patch. The device endpoints and the
/// transmitter CRUD share this shape; aliases accept both field spellings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertTransmitter {
    pub id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub name: Option<String>,
    #[serde(alias = "displayLabel")]
    pub label: Option<String>,
    pub display_order: Option<i32>,
    #[serde(alias = "frequency")]
    pub frequency_mhz: Option<f64>,
    #[serde(alias = "power")]
    pub power_watts: Option<f64>,
    pub status: Option<String>,
    #[serde(alias = "snmpHost")]
    pub host: Option<String>,
    #[serde(alias = "snmpPort")]
    pub port: Option<i32>,
    #[serde(alias = "snmpCommunity")]
    pub community: Option<String>,
    #[serde(alias = "snmpVersion")]
    pub version: Option<i32>,
    pub oids: Option<Vec<String>>,
    pub poll_interval: Option<i32>,
    pub is_active: Option<bool>,
}

impl UpsertTransmitter {
    /// Minimum accepted polling cadence, in milliseconds.
    pub const MIN_POLL_INTERVAL: i32 = 1000;

    /// Shape checks shared by every write path. Returns a human-readable
    /// reason on rejection.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.poll_interval {
            if interval < Self::MIN_POLL_INTERVAL {
                return Err(format!(
                    "pollInterval must be at least {} ms",
                    Self::MIN_POLL_INTERVAL
                ));
            }
        }
        if let Some(version) = self.version {
            if !(0..=1).contains(&version) {
                return Err("version must be 0 (v1) or 1 (v2c)".to_string());
            }
        }
        if let Some(oids) = &self.oids {
            for oid in oids {
                if !crate::oid::is_valid_oid(oid) {
                    return Err(format!("invalid OID: {oid}"));
                }
            }
        }
        if let Some(status) = &self.status {
            const STATUSES: [&str; 5] = ["active", "standby", "offline", "fault", "unknown"];
            if !STATUSES.contains(&status.as_str()) {
                return Err(format!("invalid status: {status}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_view_projection() {
        let row = TransmitterRow {
            id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            name: "North Ridge TX1".into(),
            display_label: Some("Main".into()),
            display_order: 2,
            frequency_mhz: Some(95.8),
            power_watts: Some(1000.0),
            status: "active".into(),
            snmp_host: "10.0.0.5".into(),
            snmp_port: 161,
            snmp_community: "public".into(),
            snmp_version: 1,
            oids: serde_json::json!(["1.3.6.1.4.1.31946.4.2.6.10.1"]),
            poll_interval: 10_000,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let t = Transmitter::from(row);
        assert_eq!(t.oids.len(), 1);

        let view = DeviceView::from(t.clone());
        assert_eq!(view.host, "10.0.0.5");
        assert_eq!(view.port, 161);
        assert_eq!(view.label.as_deref(), Some("Main"));
        assert_eq!(view.site_id, t.site_id);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("pollInterval").is_some());
        assert!(json.get("isActive").is_some());
        assert!(json.get("siteId").is_some());
    }

    #[test]
    fn upsert_accepts_both_field_spellings() {
        let body = serde_json::json!({
            "snmpHost": "10.1.1.1",
            "snmpPort": 1161,
            "community": "private",
            "version": 1
        });
        let req: UpsertTransmitter = serde_json::from_value(body).unwrap();
        assert_eq!(req.host.as_deref(), Some("10.1.1.1"));
        assert_eq!(req.port, Some(1161));
        assert_eq!(req.community.as_deref(), Some("private"));
    }

    #[test]
    fn upsert_validation() {
        let mut req = UpsertTransmitter {
            poll_interval: Some(500),
            ..Default::default()
        };
        assert!(req.validate().is_err());

        req.poll_interval = Some(1000);
        assert!(req.validate().is_ok());

        req.oids = Some(vec!["not-an-oid".into()]);
        assert!(req.validate().is_err());

        req.oids = Some(vec!["1.3.6.1.4.1.31946.4.2.6.10.1".into()]);
        req.version = Some(3);
        assert!(req.validate().is_err());
    }
}
