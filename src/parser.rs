//! Metric interpretation: raw varbind maps from a poll become typed
//! transmitter observations.

use chrono::Utc;

use crate::models::metric::{RawValue, RawVarbinds, TransmitterMetricData};
use crate::oid::{strip_instance, strip_scalar};

const OID_FORWARD_POWER: &str = "1.3.6.1.4.1.31946.4.2.6.10.1";
const OID_REFLECTED_POWER: &str = "1.3.6.1.4.1.31946.4.2.6.10.2";
const OID_ON_AIR_STATUS: &str = "1.3.6.1.4.1.31946.4.2.6.10.12";
const OID_STANDBY_STATUS: &str = "1.3.6.1.4.1.31946.4.2.6.10.13";
const OID_FREQUENCY: &str = "1.3.6.1.4.1.31946.4.2.6.10.14";
const OID_RADIO_NAME: &str = "1.3.6.1.4.1.31946.3.1.7";

/// Frequency arrives in tens of kHz; divide to get MHz.
const FREQUENCY_SCALE: f64 = 100.0;

/// Parse a successful poll response into a metric record.
///
/// Unknown OIDs are ignored. Status derivation is the single source of
/// truth for liveness: a response that carries neither status base is
/// recorded as `offline` even when measurements resolved.
pub fn parse_metrics(raw: RawVarbinds) -> TransmitterMetricData {
    let forward_power = find_value(&raw, OID_FORWARD_POWER);
    let reflected_power = find_value(&raw, OID_REFLECTED_POWER);
    let frequency = find_value(&raw, OID_FREQUENCY).map(|v| v / FREQUENCY_SCALE);
    let status = derive_status(&raw);
    let vswr = derive_vswr(forward_power, reflected_power);
    let radio_name = find_radio_name(&raw);

    TransmitterMetricData {
        timestamp: Utc::now(),
        power_output: None,
        forward_power,
        reflected_power,
        frequency,
        vswr,
        temperature: None,
        status,
        raw,
        error: None,
        radio_name,
    }
}

/// Numeric value for a measurement base: direct, then scalar `.0`, then
/// indexed instances in ascending order.
fn find_value(raw: &RawVarbinds, base: &str) -> Option<f64> {
    if let Some(v) = raw.get(base).and_then(RawValue::as_f64) {
        return Some(v);
    }
    if let Some(v) = raw.get(&format!("{base}.0")).and_then(RawValue::as_f64) {
        return Some(v);
    }
    // Any other instance index, lowest OID first so the result is stable.
    let mut keys: Vec<&String> = raw
        .keys()
        .filter(|k| {
            let stripped = strip_instance(strip_scalar(k));
            stripped == base && k.as_str() != base
        })
        .collect();
    keys.sort();
    keys.into_iter().find_map(|k| raw.get(k).and_then(RawValue::as_f64))
}

fn find_int(raw: &RawVarbinds, base: &str) -> Option<i64> {
    find_value(raw, base).and_then(|v| if v.fract() == 0.0 { Some(v as i64) } else { None })
}

/// Operational status from the standby-status base, falling back to the
/// on-air base. No numeric value under either base means the transmitter
/// is off the air.
fn derive_status(raw: &RawVarbinds) -> String {
    match find_int(raw, OID_STANDBY_STATUS) {
        Some(1) => return "active".to_string(),
        Some(2) => return "standby".to_string(),
        _ => {}
    }
    match find_int(raw, OID_ON_AIR_STATUS) {
        Some(2) => "active".to_string(),
        Some(_) => "standby".to_string(),
        None => "offline".to_string(),
    }
}

/// VSWR from forward/reflected power when the agent does not report it
/// directly. Emitted only when the ratio is defined and finite.
fn derive_vswr(forward: Option<f64>, reflected: Option<f64>) -> Option<f64> {
    let forward = forward?;
    let reflected = reflected?;
    if forward <= 0.0 || reflected < 0.0 {
        return None;
    }
    let gamma = (reflected / forward).sqrt();
    if gamma >= 1.0 {
        return None;
    }
    let vswr = (1.0 + gamma) / (1.0 - gamma);
    vswr.is_finite().then_some(vswr)
}

/// Device-reported radio name, when the agent includes it.
fn find_radio_name(raw: &RawVarbinds) -> Option<String> {
    let value = raw
        .get(OID_RADIO_NAME)
        .or_else(|| raw.get(&format!("{OID_RADIO_NAME}.0")))?;
    let name = value.as_text()?.trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, RawValue)]) -> RawVarbinds {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn standby_status_one_is_active() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.13.0",
            RawValue::Int(1),
        )]));
        assert_eq!(m.status, "active");
    }

    #[test]
    fn standby_status_two_is_standby() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.13.0",
            RawValue::Int(2),
        )]));
        assert_eq!(m.status, "standby");
    }

    #[test]
    fn on_air_status_used_when_standby_absent() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.12.4",
            RawValue::Int(2),
        )]));
        assert_eq!(m.status, "active");

        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.12.0",
            RawValue::Int(1),
        )]));
        assert_eq!(m.status, "standby");
    }

    #[test]
    fn no_status_base_means_offline() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.1.0",
            RawValue::Int(500),
        )]));
        assert_eq!(m.status, "offline");
    }

    #[test]
    fn standby_takes_priority_over_on_air() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.13.0", RawValue::Int(2)),
            ("1.3.6.1.4.1.31946.4.2.6.10.12.0", RawValue::Int(2)),
        ]));
        assert_eq!(m.status, "standby");
    }

    #[test]
    fn frequency_scales_to_mhz() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.14.0",
            RawValue::Int(9580),
        )]));
        assert_eq!(m.frequency, Some(95.80));
    }

    #[test]
    fn vswr_from_forward_and_reflected() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(100)),
            ("1.3.6.1.4.1.31946.4.2.6.10.2.0", RawValue::Int(4)),
        ]));
        assert_eq!(m.forward_power, Some(100.0));
        assert_eq!(m.reflected_power, Some(4.0));
        let vswr = m.vswr.unwrap();
        assert!((vswr - 1.5).abs() < 1e-9, "vswr was {vswr}");
    }

    #[test]
    fn vswr_finite_guard() {
        // Full reflection: gamma = 1, denominator 0.
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(100)),
            ("1.3.6.1.4.1.31946.4.2.6.10.2.0", RawValue::Int(100)),
        ]));
        assert_eq!(m.vswr, None);

        // Reflected above forward is physically bogus; still no emission.
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(100)),
            ("1.3.6.1.4.1.31946.4.2.6.10.2.0", RawValue::Int(400)),
        ]));
        assert_eq!(m.vswr, None);
    }

    #[test]
    fn missing_reflected_skips_vswr() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(500)),
            ("1.3.6.1.4.1.31946.4.2.6.10.13.0", RawValue::Int(1)),
        ]));
        assert_eq!(m.forward_power, Some(500.0));
        assert_eq!(m.reflected_power, None);
        assert_eq!(m.vswr, None);
        assert_eq!(m.status, "active");
    }

    #[test]
    fn scalar_form_wins_over_indexed() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(500)),
            ("1.3.6.1.4.1.31946.4.2.6.10.1.2", RawValue::Int(120)),
        ]));
        assert_eq!(m.forward_power, Some(500.0));
    }

    #[test]
    fn indexed_only_still_resolves() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.4.2.6.10.1.3",
            RawValue::Int(480),
        )]));
        assert_eq!(m.forward_power, Some(480.0));
    }

    #[test]
    fn unknown_oids_are_ignored() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.2.1.1.3.0", RawValue::Uint(123456)),
            ("1.3.6.1.4.1.99999.1.0", RawValue::Int(7)),
        ]));
        assert_eq!(m.forward_power, None);
        assert_eq!(m.power_output, None);
        assert_eq!(m.status, "offline");
        assert_eq!(m.raw.len(), 2);
    }

    #[test]
    fn radio_name_decodes_byte_form() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.3.1.7.0",
            RawValue::Bytes(b"  WXYZ-FM \n".to_vec()),
        )]));
        assert_eq!(m.radio_name.as_deref(), Some("WXYZ-FM"));
    }

    #[test]
    fn blank_radio_name_not_proposed() {
        let m = parse_metrics(raw(&[(
            "1.3.6.1.4.1.31946.3.1.7.0",
            RawValue::Text("   ".into()),
        )]));
        assert_eq!(m.radio_name, None);
    }

    #[test]
    fn happy_path_poll_parses_completely() {
        let m = parse_metrics(raw(&[
            ("1.3.6.1.4.1.31946.4.2.6.10.1.0", RawValue::Int(500)),
            ("1.3.6.1.4.1.31946.4.2.6.10.2.0", RawValue::Int(10)),
            ("1.3.6.1.4.1.31946.4.2.6.10.12.0", RawValue::Int(2)),
            ("1.3.6.1.4.1.31946.4.2.6.10.14.0", RawValue::Int(9580)),
            ("1.3.6.1.4.1.31946.4.2.6.10.13.0", RawValue::Int(1)),
        ]));
        assert_eq!(m.forward_power, Some(500.0));
        assert_eq!(m.reflected_power, Some(10.0));
        assert_eq!(m.frequency, Some(95.80));
        assert_eq!(m.status, "active");
        let vswr = m.vswr.unwrap();
        assert!(vswr > 1.0 && vswr < 1.5, "vswr was {vswr}");
        assert!(m.error.is_none());
    }
}
