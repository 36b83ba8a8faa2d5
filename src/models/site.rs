use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Technician contact details for a site.
///
/// Historically this was persisted as a bare email string; `from_stored`
/// tolerates that form and lifts it into the structured shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub technician: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

impl ContactInfo {
    /// Normalize the stored TEXT column: a JSON object parses as-is, any
    /// other non-empty string is treated as a legacy email.
    pub fn from_stored(stored: Option<&str>) -> Option<ContactInfo> {
        let raw = stored?.trim();
        if raw.is_empty() {
            return None;
        }
        match serde_json::from_str::<ContactInfo>(raw) {
            Ok(info) => Some(info),
            Err(_) => Some(ContactInfo {
                technician: String::new(),
                phone: String::new(),
                email: raw.to_string(),
            }),
        }
    }
}

/// Row shape as read from `sites`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SiteRow {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub contact_info: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of a site, contact info normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub contact_info: Option<ContactInfo>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SiteRow> for Site {
    fn from(r: SiteRow) -> Self {
        let contact_info = ContactInfo::from_stored(r.contact_info.as_deref());
        Self {
            id: r.id,
            name: r.name,
            location: r.location,
            latitude: r.latitude,
            longitude: r.longitude,
            address: r.address,
            contact_info,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequest {
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    /// Accepts either the structured object or a legacy string.
    pub contact_info: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSiteRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub contact_info: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

/// Reduce an incoming contact-info value to its stored TEXT form.
pub fn contact_info_to_stored(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn default_true() -> bool {
    true
}
