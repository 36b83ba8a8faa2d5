//! SNMP session handling: one UDP session per device, GET for polling,
//! GETNEXT walks for template discovery, and a one-shot probe for
//! connectivity tests.

use std::time::Duration;

use snmp2::{AsyncSession, Oid, Value};
use tokio::time::timeout;

use crate::models::metric::{RawValue, RawVarbinds};
use crate::models::transmitter::Transmitter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_RETRIES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    #[error("invalid OID {0}")]
    InvalidOid(String),
    #[error("request timeout after {REQUEST_RETRIES} attempts")]
    Timeout,
    #[error("session error: {0}")]
    Session(String),
}

/// Connection tuple for one agent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpEndpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
    /// 0 = v1, 1 = v2c.
    #[serde(default)]
    pub version: i32,
}

fn default_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

impl SnmpEndpoint {
    pub fn from_transmitter(t: &Transmitter) -> Self {
        Self {
            host: t.snmp_host.clone(),
            port: t.snmp_port.clamp(1, u16::MAX as i32) as u16,
            community: t.snmp_community.clone(),
            version: t.snmp_version,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A varbind as returned by a GET or walk, already filtered of
/// protocol-level error markers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Varbind {
    pub oid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: RawValue,
}

pub fn varbinds_to_map(varbinds: Vec<Varbind>) -> RawVarbinds {
    varbinds.into_iter().map(|vb| (vb.oid, vb.value)).collect()
}

/// Long-lived session for one device. The session survives transient
/// request errors; the address is re-resolved only when the session is
/// recreated.
pub struct DeviceSession {
    endpoint: SnmpEndpoint,
    session: Option<AsyncSession>,
}

impl DeviceSession {
    pub fn new(endpoint: SnmpEndpoint) -> Self {
        Self {
            endpoint,
            session: None,
        }
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    async fn session(&mut self) -> Result<&mut AsyncSession, SnmpError> {
        if self.session.is_none() {
            self.session = Some(open_session(&self.endpoint).await?);
        }
        match self.session.as_mut() {
            Some(session) => Ok(session),
            None => Err(SnmpError::Session("session unavailable".to_string())),
        }
    }

    /// GET every OID in the list. Protocol-level misses (`noSuchObject`,
    /// `noSuchInstance`, `endOfMibView`) are dropped so they never
    /// overwrite resolved siblings; a transport timeout aborts the poll.
    pub async fn get_many(&mut self, oids: &[String]) -> Result<Vec<Varbind>, SnmpError> {
        let mut out = Vec::new();
        for oid_str in oids {
            let oid = parse_oid(oid_str)?;
            let session = self.session().await?;
            match get_with_retries(session, &oid).await {
                Ok(Some(vb)) => out.push(vb),
                Ok(None) => {}
                Err(SnmpError::Timeout) => return Err(SnmpError::Timeout),
                Err(e) => {
                    // Per-OID protocol errors leave siblings intact.
                    tracing::debug!(oid = %oid_str, error = %e, "varbind dropped");
                }
            }
        }
        Ok(out)
    }

    /// GETNEXT from a subtree root, accumulating until the walk leaves the
    /// subtree, hits `endOfMibView`, or reaches `max` entries.
    pub async fn walk(&mut self, root: &str, max: usize) -> Result<Vec<Varbind>, SnmpError> {
        let root_oid = parse_oid(root)?;
        let mut current = root_oid.to_owned();
        let mut out = Vec::new();

        while out.len() < max {
            let session = self.session().await?;
            let mut pdu = match timeout(REQUEST_TIMEOUT, session.getnext(&current)).await {
                Ok(Ok(pdu)) => pdu,
                Ok(Err(e)) => return Err(SnmpError::Session(format!("{e:?}"))),
                Err(_) => return Err(SnmpError::Timeout),
            };

            let Some((resp_oid, value)) = pdu.varbinds.next() else {
                break;
            };
            if !resp_oid.starts_with(&root_oid) {
                break;
            }
            if matches!(value, Value::EndOfMibView) {
                break;
            }

            let oid_string = resp_oid.to_id_string();
            if oid_string == current.to_id_string() {
                // Agent is not advancing; bail rather than spin.
                break;
            }
            let next = resp_oid.to_owned();
            if let Some((kind, raw)) = convert_value(&value) {
                out.push(Varbind {
                    oid: oid_string,
                    kind: kind.to_string(),
                    value: raw,
                });
            }
            current = next;
        }

        Ok(out)
    }
}

/// One-shot session + GET + close cycle for connectivity checks.
pub async fn probe(endpoint: &SnmpEndpoint, oids: &[String]) -> Result<Vec<Varbind>, SnmpError> {
    let mut session = DeviceSession::new(endpoint.clone());
    let result = session.get_many(oids).await;
    session.close();
    result
}

async fn open_session(endpoint: &SnmpEndpoint) -> Result<AsyncSession, SnmpError> {
    let address = endpoint.address();
    let community = endpoint.community.as_bytes();
    let create = async {
        match endpoint.version {
            0 => AsyncSession::new_v1(&address, community, 0).await,
            _ => AsyncSession::new_v2c(&address, community, 0).await,
        }
    };
    match timeout(REQUEST_TIMEOUT, create).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(SnmpError::Session(format!("{e:?}"))),
        Err(_) => Err(SnmpError::Timeout),
    }
}

async fn get_with_retries(
    session: &mut AsyncSession,
    oid: &Oid<'_>,
) -> Result<Option<Varbind>, SnmpError> {
    let mut last_err = SnmpError::Timeout;
    for _ in 0..REQUEST_RETRIES {
        match timeout(REQUEST_TIMEOUT, session.get(oid)).await {
            Ok(Ok(mut pdu)) => {
                if let Some((resp_oid, value)) = pdu.varbinds.next() {
                    let vb = convert_value(&value).map(|(kind, raw)| Varbind {
                        oid: resp_oid.to_id_string(),
                        kind: kind.to_string(),
                        value: raw,
                    });
                    return Ok(vb);
                }
                return Ok(None);
            }
            Ok(Err(e)) => return Err(SnmpError::Session(format!("{e:?}"))),
            Err(_) => {
                last_err = SnmpError::Timeout;
            }
        }
    }
    Err(last_err)
}

fn parse_oid(oid_str: &str) -> Result<Oid<'static>, SnmpError> {
    oid_str
        .trim()
        .trim_start_matches('.')
        .parse::<Oid>()
        .map(|oid| oid.to_owned())
        .map_err(|_| SnmpError::InvalidOid(oid_str.to_string()))
}

/// Map a wire value to `(readable type name, raw value)`. Protocol error
/// markers and null map to `None` and are filtered out.
fn convert_value(value: &Value) -> Option<(&'static str, RawValue)> {
    match value {
        Value::Integer(n) => Some(("Integer", RawValue::Int(*n))),
        Value::OctetString(s) => match String::from_utf8(s.to_vec()) {
            Ok(text) if text.chars().all(|c| !c.is_control() || c == '\n' || c == '\t') => {
                Some(("OctetString", RawValue::Text(text)))
            }
            _ => Some(("OctetString", RawValue::Bytes(s.to_vec()))),
        },
        Value::ObjectIdentifier(oid) => {
            Some(("ObjectIdentifier", RawValue::Text(oid.to_id_string())))
        }
        Value::IpAddress(ip) => Some((
            "IpAddress",
            RawValue::Text(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])),
        )),
        Value::Counter32(n) => Some(("Counter32", RawValue::Uint(*n as u64))),
        Value::Unsigned32(n) => Some(("Unsigned32", RawValue::Uint(*n as u64))),
        Value::Timeticks(n) => Some(("TimeTicks", RawValue::Uint(*n as u64))),
        Value::Counter64(n) => Some(("Counter64", RawValue::Uint(*n))),
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_address_formatting() {
        let ep = SnmpEndpoint {
            host: "10.0.0.5".into(),
            port: 161,
            community: "public".into(),
            version: 1,
        };
        assert_eq!(ep.address(), "10.0.0.5:161");
    }

    #[test]
    fn endpoint_deserializes_with_defaults() {
        let ep: SnmpEndpoint = serde_json::from_str(r#"{"host": "10.0.0.7"}"#).unwrap();
        assert_eq!(ep.port, 161);
        assert_eq!(ep.community, "public");
        assert_eq!(ep.version, 0);
    }

    #[test]
    fn protocol_error_values_are_filtered() {
        assert!(convert_value(&Value::NoSuchObject).is_none());
        assert!(convert_value(&Value::NoSuchInstance).is_none());
        assert!(convert_value(&Value::EndOfMibView).is_none());
        assert!(convert_value(&Value::Null).is_none());
    }

    #[test]
    fn integer_value_converts() {
        let (kind, raw) = convert_value(&Value::Integer(9580)).unwrap();
        assert_eq!(kind, "Integer");
        assert_eq!(raw, RawValue::Int(9580));
    }

    #[test]
    fn varbind_map_collects_by_oid() {
        let vbs = vec![
            Varbind {
                oid: "1.3.6.1.4.1.31946.4.2.6.10.1.0".into(),
                kind: "Integer".into(),
                value: RawValue::Int(500),
            },
            Varbind {
                oid: "1.3.6.1.4.1.31946.4.2.6.10.14.0".into(),
                kind: "Integer".into(),
                value: RawValue::Int(9580),
            },
        ];
        let map = varbinds_to_map(vbs);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("1.3.6.1.4.1.31946.4.2.6.10.1.0"),
            Some(&RawValue::Int(500))
        );
    }
}
