//! UDP trap listener. Binds the privileged trap port when it can, falls
//! back under an operator-controlled policy when it cannot, and normalizes
//! v1/v2c notifications into uniform records.

use std::io::IsTerminal;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use rasn_smi::v1 as smi_v1;
use rasn_smi::v2 as smi_v2;
use rasn_snmp::v1;
use rasn_snmp::v2;
use rasn_snmp::v2c;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::TrapConfig;
use crate::models::trap::{IncomingTrap, TrapVarbind};
use crate::store::Store;

/// snmpTrapOID.0, the v2c trap identity varbind.
const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";
/// Enterprise varbind some agents attach to forwarded v1 traps.
const SNMP_ENTERPRISE_OID: &str = "1.3.6.1.4.1.0";
/// Prefix of the standard trap identities generic v1 traps map onto.
const SNMP_TRAPS_PREFIX: &str = "1.3.6.1.6.3.1.1.5";

/// A trap PDU decoded from the wire, before sender attribution.
#[derive(Debug, Clone)]
pub struct TrapPdu {
    /// 0 = v1, 1 = v2c.
    pub version: i32,
    pub community: Option<String>,
    pub trap_oid: Option<String>,
    pub enterprise_oid: Option<String>,
    pub varbinds: Vec<TrapVarbind>,
}

pub struct TrapReceiver {
    store: Store,
    config: TrapConfig,
}

impl TrapReceiver {
    pub fn new(store: Store, config: TrapConfig) -> Self {
        Self { store, config }
    }

    /// Bind per the fallback policy and start the receive loop. A bind
    /// failure here is fatal; everything after is logged and survived.
    pub async fn start(self) -> Result<JoinHandle<()>> {
        let socket = bind_with_fallback(&self.config).await?;
        Ok(tokio::spawn(self.run(socket)))
    }

    async fn run(self, socket: UdpSocket) {
        let mut buf = vec![0u8; 65535];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    if let Err(e) = self.handle_datagram(&buf[..len], src).await {
                        tracing::warn!(src = %src, error = %e, "trap dropped");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "trap receive error");
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) -> Result<()> {
        let pdu = parse_trap(data)?;
        let source_host = src.ip().to_string();

        tracing::debug!(
            src = %src,
            version = pdu.version,
            trap_oid = ?pdu.trap_oid,
            varbinds = pdu.varbinds.len(),
            "trap received"
        );

        // Attribution is best-effort; an unknown sender still gets stored.
        let (transmitter_id, site_id) = match self.store.find_transmitter_by_host(&source_host).await
        {
            Ok(Some(t)) => (Some(t.id), Some(t.site_id)),
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(source = %source_host, error = %e, "trap attribution failed");
                (None, None)
            }
        };

        let incoming = IncomingTrap {
            source_host,
            source_port: src.port(),
            community: pdu.community,
            version: pdu.version,
            trap_oid: pdu.trap_oid,
            enterprise_oid: pdu.enterprise_oid,
            varbinds: pdu.varbinds,
        };
        self.store
            .store_trap(&incoming, transmitter_id, site_id)
            .await
            .context("trap write failed")?;
        Ok(())
    }
}

/// Bind the primary trap port, falling back per policy on `EACCES` /
/// `EADDRINUSE`.
async fn bind_with_fallback(config: &TrapConfig) -> Result<UdpSocket> {
    match UdpSocket::bind(("0.0.0.0", config.port)).await {
        Ok(socket) => {
            tracing::info!(port = config.port, "trap receiver listening");
            Ok(socket)
        }
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::AddrInUse
            ) =>
        {
            if config.require_privileged && !config.auto_fallback {
                if !std::io::stdin().is_terminal() {
                    bail!(
                        "cannot bind trap port {} ({e}) and no interactive terminal to confirm \
                         fallback; grant cap_net_bind_service or set SNMP_TRAP_AUTO_FALLBACK=true",
                        config.port
                    );
                }
                if !confirm_fallback(config.port, config.fallback_port).await? {
                    bail!("operator declined trap port fallback");
                }
            }
            tracing::warn!(
                primary = config.port,
                fallback = config.fallback_port,
                "trap port unavailable ({e}); binding fallback port instead. Grant \
                 cap_net_bind_service or run elevated to use the standard port"
            );
            let socket = UdpSocket::bind(("0.0.0.0", config.fallback_port))
                .await
                .with_context(|| {
                    format!("failed to bind fallback trap port {}", config.fallback_port)
                })?;
            tracing::info!(port = config.fallback_port, "trap receiver listening");
            Ok(socket)
        }
        Err(e) => Err(e).with_context(|| format!("failed to bind trap port {}", config.port)),
    }
}

async fn confirm_fallback(primary: u16, fallback: u16) -> Result<bool> {
    eprintln!("Cannot bind privileged trap port {primary}. Fall back to port {fallback}? [y/N]");
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("prompt task failed")??;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Decode a trap datagram, trying v1 then v2c.
pub fn parse_trap(data: &[u8]) -> Result<TrapPdu> {
    if let Ok(msg) = rasn::ber::decode::<v1::Message<v1::Pdus>>(data) {
        return parse_v1(msg);
    }
    if let Ok(msg) = rasn::ber::decode::<v2c::Message<v2::Pdus>>(data) {
        return parse_v2c(msg);
    }
    bail!("undecodable trap datagram ({} bytes)", data.len())
}

fn parse_v1(msg: v1::Message<v1::Pdus>) -> Result<TrapPdu> {
    let community = String::from_utf8_lossy(&msg.community).to_string();
    let v1::Pdus::Trap(trap) = msg.data else {
        bail!("unexpected v1 PDU type");
    };

    let enterprise = oid_to_string(&trap.enterprise);
    let generic = integer_to_i64(&trap.generic_trap);
    let specific = integer_to_i64(&trap.specific_trap);
    let varbinds: Vec<TrapVarbind> = trap
        .variable_bindings
        .iter()
        .map(|vb| {
            let (kind, value) = v1_syntax_to_value(&vb.value);
            TrapVarbind {
                oid: oid_to_string(&vb.name),
                kind,
                value,
            }
        })
        .collect();

    // RFC 2576 identity mapping: generic traps get the standard trap OID,
    // enterprise-specific ones are anchored under the enterprise subtree.
    let trap_oid = match generic {
        0..=5 => Some(format!("{SNMP_TRAPS_PREFIX}.{}", generic + 1)),
        6 => Some(format!("{enterprise}.0.{specific}")),
        _ => None,
    };

    Ok(TrapPdu {
        version: 0,
        community: Some(community),
        trap_oid,
        enterprise_oid: Some(enterprise),
        varbinds,
    })
}

fn parse_v2c(msg: v2c::Message<v2::Pdus>) -> Result<TrapPdu> {
    let community = String::from_utf8_lossy(&msg.community).to_string();
    let bindings = match msg.data {
        v2::Pdus::Trap(trap) => trap.0.variable_bindings,
        v2::Pdus::InformRequest(inform) => inform.0.variable_bindings,
        _ => bail!("unexpected v2c PDU type"),
    };

    let varbinds: Vec<TrapVarbind> = bindings
        .iter()
        .map(|vb| {
            let (kind, value) = v2_varbind_to_value(&vb.value);
            TrapVarbind {
                oid: oid_to_string(&vb.name),
                kind,
                value,
            }
        })
        .collect();

    let trap_oid = varbind_string(&varbinds, SNMP_TRAP_OID);
    let enterprise_oid = varbind_string(&varbinds, SNMP_ENTERPRISE_OID);

    Ok(TrapPdu {
        version: 1,
        community: Some(community),
        trap_oid,
        enterprise_oid,
        varbinds,
    })
}

fn varbind_string(varbinds: &[TrapVarbind], oid: &str) -> Option<String> {
    varbinds
        .iter()
        .find(|vb| vb.oid == oid)
        .and_then(|vb| vb.value.as_str().map(str::to_string))
}

fn oid_to_string(oid: &rasn::types::ObjectIdentifier) -> String {
    oid.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn integer_to_i64(int: &rasn::types::Integer) -> i64 {
    i64::try_from(int).unwrap_or(0)
}

fn v1_syntax_to_value(syntax: &smi_v1::ObjectSyntax) -> (Option<String>, serde_json::Value) {
    match syntax {
        smi_v1::ObjectSyntax::Simple(simple) => match simple {
            smi_v1::SimpleSyntax::Number(n) => (kind("Integer"), integer_to_i64(n).into()),
            smi_v1::SimpleSyntax::String(s) => {
                (kind("OctetString"), String::from_utf8_lossy(s).into())
            }
            smi_v1::SimpleSyntax::Object(oid) => {
                (kind("ObjectIdentifier"), oid_to_string(oid).into())
            }
            smi_v1::SimpleSyntax::Empty => (kind("Null"), serde_json::Value::Null),
        },
        smi_v1::ObjectSyntax::ApplicationWide(app) => match app {
            smi_v1::ApplicationSyntax::Counter(c) => (kind("Counter32"), c.0.into()),
            smi_v1::ApplicationSyntax::Gauge(g) => (kind("Gauge32"), g.0.into()),
            smi_v1::ApplicationSyntax::Ticks(t) => (kind("TimeTicks"), t.0.into()),
            smi_v1::ApplicationSyntax::Arbitrary(bytes) => {
                (kind("Opaque"), serde_json::json!(bytes.as_ref().to_vec()))
            }
            smi_v1::ApplicationSyntax::Address(addr) => {
                (kind("IpAddress"), network_addr_to_string(addr).into())
            }
        },
    }
}

fn v2_varbind_to_value(value: &v2::VarBindValue) -> (Option<String>, serde_json::Value) {
    match value {
        v2::VarBindValue::Value(syntax) => match syntax {
            smi_v2::ObjectSyntax::Simple(simple) => match simple {
                smi_v2::SimpleSyntax::Integer(n) => (kind("Integer"), integer_to_i64(n).into()),
                smi_v2::SimpleSyntax::String(s) => {
                    (kind("OctetString"), String::from_utf8_lossy(s).into())
                }
                smi_v2::SimpleSyntax::ObjectId(oid) => {
                    (kind("ObjectIdentifier"), oid_to_string(oid).into())
                }
            },
            smi_v2::ObjectSyntax::ApplicationWide(app) => match app {
                smi_v2::ApplicationSyntax::Counter(c) => (kind("Counter32"), c.0.into()),
                smi_v2::ApplicationSyntax::Unsigned(u) => (kind("Unsigned32"), u.0.into()),
                smi_v2::ApplicationSyntax::Ticks(t) => (kind("TimeTicks"), t.0.into()),
                smi_v2::ApplicationSyntax::Arbitrary(bytes) => {
                    (kind("Opaque"), serde_json::json!(bytes.as_ref().to_vec()))
                }
                smi_v2::ApplicationSyntax::Address(addr) => (
                    kind("IpAddress"),
                    format!("{}.{}.{}.{}", addr.0[0], addr.0[1], addr.0[2], addr.0[3]).into(),
                ),
                smi_v2::ApplicationSyntax::BigCounter(c) => (kind("Counter64"), c.0.into()),
            },
        },
        v2::VarBindValue::Unspecified => (None, serde_json::Value::Null),
        v2::VarBindValue::NoSuchObject => (kind("NoSuchObject"), serde_json::Value::Null),
        v2::VarBindValue::NoSuchInstance => (kind("NoSuchInstance"), serde_json::Value::Null),
        v2::VarBindValue::EndOfMibView => (kind("EndOfMibView"), serde_json::Value::Null),
    }
}

fn network_addr_to_string(addr: &smi_v1::NetworkAddress) -> String {
    match addr {
        smi_v1::NetworkAddress::Internet(ip) => {
            format!("{}.{}.{}.{}", ip.0[0], ip.0[1], ip.0[2], ip.0[3])
        }
    }
}

fn kind(name: &str) -> Option<String> {
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasn::types::ObjectIdentifier;

    fn encode_v1_cold_start() -> Vec<u8> {
        let enterprise =
            ObjectIdentifier::new_unchecked(vec![1, 3, 6, 1, 4, 1, 31946].into());
        let agent_addr = smi_v1::NetworkAddress::Internet(smi_v1::IpAddress(
            rasn::types::FixedOctetString::new([10, 0, 0, 5]),
        ));
        let trap = v1::Trap {
            enterprise,
            agent_addr,
            generic_trap: 0.into(),
            specific_trap: 0.into(),
            time_stamp: smi_v1::TimeTicks(100),
            variable_bindings: v1::VarBindList::new(),
        };
        let msg = v1::Message {
            version: 0.into(),
            community: b"public".to_vec().into(),
            data: v1::Pdus::Trap(trap),
        };
        rasn::ber::encode(&msg).expect("v1 trap encodes")
    }

    fn encode_v2c_link_down() -> Vec<u8> {
        let sys_uptime =
            ObjectIdentifier::new_unchecked(vec![1, 3, 6, 1, 2, 1, 1, 3, 0].into());
        let trap_oid_name =
            ObjectIdentifier::new_unchecked(vec![1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0].into());
        let link_down =
            ObjectIdentifier::new_unchecked(vec![1, 3, 6, 1, 6, 3, 1, 1, 5, 3].into());

        let varbinds = vec![
            v2::VarBind {
                name: sys_uptime,
                value: v2::VarBindValue::Value(smi_v2::ObjectSyntax::ApplicationWide(
                    smi_v2::ApplicationSyntax::Ticks(smi_v1::TimeTicks(256)),
                )),
            },
            v2::VarBind {
                name: trap_oid_name,
                value: v2::VarBindValue::Value(smi_v2::ObjectSyntax::Simple(
                    smi_v2::SimpleSyntax::ObjectId(link_down),
                )),
            },
        ];

        let pdu = v2::Pdu {
            request_id: 1.into(),
            error_status: 0u32.into(),
            error_index: 0u32.into(),
            variable_bindings: varbinds.into(),
        };
        let msg = v2c::Message {
            version: 1.into(),
            community: b"public".to_vec().into(),
            data: v2::Pdus::Trap(v2::Trap(pdu)),
        };
        rasn::ber::encode(&msg).expect("v2c trap encodes")
    }

    #[test]
    fn v1_trap_parses_with_version_zero() {
        let parsed = parse_trap(&encode_v1_cold_start()).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.community.as_deref(), Some("public"));
        assert_eq!(parsed.enterprise_oid.as_deref(), Some("1.3.6.1.4.1.31946"));
        // coldStart maps onto the standard trap identity.
        assert_eq!(parsed.trap_oid.as_deref(), Some("1.3.6.1.6.3.1.1.5.1"));
        assert!(parsed.varbinds.is_empty());
    }

    #[test]
    fn v2c_trap_parses_with_version_one() {
        let parsed = parse_trap(&encode_v2c_link_down()).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.community.as_deref(), Some("public"));
        assert_eq!(parsed.trap_oid.as_deref(), Some("1.3.6.1.6.3.1.1.5.3"));
        assert!(parsed.enterprise_oid.is_none());
        assert_eq!(parsed.varbinds.len(), 2);

        let uptime = &parsed.varbinds[0];
        assert_eq!(uptime.oid, "1.3.6.1.2.1.1.3.0");
        assert_eq!(uptime.kind.as_deref(), Some("TimeTicks"));
        assert_eq!(uptime.value, serde_json::json!(256));

        let identity = &parsed.varbinds[1];
        assert_eq!(identity.kind.as_deref(), Some("ObjectIdentifier"));
        assert_eq!(identity.value, serde_json::json!("1.3.6.1.6.3.1.1.5.3"));
    }

    #[test]
    fn garbage_datagram_is_rejected() {
        assert!(parse_trap(&[0x01, 0x02, 0x03, 0x04]).is_err());
    }

    #[test]
    fn v1_syntax_conversions() {
        let (kind, value) = v1_syntax_to_value(&smi_v1::ObjectSyntax::Simple(
            smi_v1::SimpleSyntax::String(b"fault cleared".to_vec().into()),
        ));
        assert_eq!(kind.as_deref(), Some("OctetString"));
        assert_eq!(value, serde_json::json!("fault cleared"));

        let (kind, value) = v1_syntax_to_value(&smi_v1::ObjectSyntax::ApplicationWide(
            smi_v1::ApplicationSyntax::Ticks(smi_v1::TimeTicks(950)),
        ));
        assert_eq!(kind.as_deref(), Some("TimeTicks"));
        assert_eq!(value, serde_json::json!(950));
    }

    #[test]
    fn v2_protocol_error_varbinds_keep_names() {
        let (kind, value) = v2_varbind_to_value(&v2::VarBindValue::NoSuchInstance);
        assert_eq!(kind.as_deref(), Some("NoSuchInstance"));
        assert!(value.is_null());

        let (kind, _) = v2_varbind_to_value(&v2::VarBindValue::Unspecified);
        assert!(kind.is_none());
    }
}
