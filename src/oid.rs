//! Dotted-decimal OID helpers and the poll-set expansion applied before
//! every GET.

/// Elenos ETG measurement subtree.
pub const ELENOS_METRIC_BASE: &str = "1.3.6.1.4.1.31946.4.2.6.10";

/// Measurement bases under the Elenos subtree that carry per-exciter
/// indexed variants alongside the scalar `.0` form.
pub const ELENOS_METRIC_SUFFIXES: [u32; 5] = [1, 2, 12, 13, 14];

/// Bases always polled when any Elenos OID is configured: forward power,
/// reflected power, on-air status, frequency.
pub const ELENOS_CORE_SUFFIXES: [u32; 4] = [1, 2, 12, 14];

/// Indexed instances polled per base (exciter slots 1-4).
const INSTANCE_INDICES: std::ops::RangeInclusive<u32> = 1..=4;

pub fn is_valid_oid(oid: &str) -> bool {
    let oid = oid.trim().trim_start_matches('.');
    let mut segments = 0;
    for part in oid.split('.') {
        if part.is_empty() || part.parse::<u32>().is_err() {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}

/// Remove a single trailing numeric component. Non-numeric tails are left
/// intact.
pub fn strip_instance(oid: &str) -> &str {
    match oid.rfind('.') {
        Some(pos) if oid[pos + 1..].parse::<u64>().is_ok() => &oid[..pos],
        _ => oid,
    }
}

/// Remove a trailing `.0` scalar marker, if present.
pub fn strip_scalar(oid: &str) -> &str {
    oid.strip_suffix(".0").unwrap_or(oid)
}

fn elenos_bases() -> impl Iterator<Item = String> {
    ELENOS_METRIC_SUFFIXES
        .iter()
        .map(|s| format!("{ELENOS_METRIC_BASE}.{s}"))
}

/// The Elenos measurement base a configured OID refers to, if any. Matches
/// the base itself, its `.0` scalar, and its indexed instances.
pub fn elenos_base_of(oid: &str) -> Option<String> {
    for base in elenos_bases() {
        if oid == base {
            return Some(base);
        }
        if let Some(rest) = oid.strip_prefix(&base) {
            if let Some(tail) = rest.strip_prefix('.') {
                if !tail.is_empty() && tail.split('.').all(|s| s.parse::<u32>().is_ok()) {
                    return Some(base);
                }
            }
        }
    }
    None
}

/// An indexed instance (`<base>.N`, N >= 1) of an Elenos measurement base.
fn is_indexed_elenos(oid: &str) -> bool {
    let base = strip_instance(oid);
    base != oid
        && elenos_bases().any(|b| b == base)
        && oid[base.len() + 1..].parse::<u32>().map(|n| n >= 1).unwrap_or(false)
}

/// Derive the wire OID list for a poll from the configured set.
///
/// Expansion is monotone (the configured set survives) and idempotent as a
/// set; indexed Elenos instances never receive an extra `.0`.
pub fn expand_poll_set(configured: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut push = |oid: String, out: &mut Vec<String>| {
        if seen.insert(oid.clone()) {
            out.push(oid);
        }
    };

    let normalized: Vec<String> = configured
        .iter()
        .map(|o| o.trim().trim_start_matches('.').to_string())
        .filter(|o| !o.is_empty())
        .collect();

    for oid in &normalized {
        push(oid.clone(), &mut out);
        if !oid.ends_with(".0") && !is_indexed_elenos(oid) {
            push(format!("{oid}.0"), &mut out);
        }
    }

    // Indexed variants for every configured Elenos measurement base.
    let mut any_elenos = false;
    let mut matched_bases: Vec<String> = Vec::new();
    for oid in &normalized {
        if let Some(base) = elenos_base_of(oid) {
            any_elenos = true;
            if !matched_bases.contains(&base) {
                matched_bases.push(base);
            }
        }
    }
    for base in &matched_bases {
        for idx in INSTANCE_INDICES {
            push(format!("{base}.{idx}"), &mut out);
        }
    }

    // Frequency and status must always be polled once the device speaks
    // Elenos, even with a misconfigured OID list.
    if any_elenos {
        for suffix in ELENOS_CORE_SUFFIXES {
            let base = format!("{ELENOS_METRIC_BASE}.{suffix}");
            push(base.clone(), &mut out);
            push(format!("{base}.0"), &mut out);
            for idx in INSTANCE_INDICES {
                push(format!("{base}.{idx}"), &mut out);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn as_set(v: &[String]) -> HashSet<String> {
        v.iter().cloned().collect()
    }

    #[test]
    fn valid_oid_shapes() {
        assert!(is_valid_oid("1.3.6.1.2.1.1.3.0"));
        assert!(is_valid_oid(".1.3.6.1"));
        assert!(is_valid_oid(" 1.3 "));
        assert!(!is_valid_oid("1"));
        assert!(!is_valid_oid("1..3"));
        assert!(!is_valid_oid("1.3.x"));
        assert!(!is_valid_oid(""));
    }

    #[test]
    fn strip_instance_removes_one_numeric_segment() {
        assert_eq!(strip_instance("1.3.6.1.2.1.1.3.0"), "1.3.6.1.2.1.1.3");
        assert_eq!(strip_instance("1.3.6.1.2.1.1.3"), "1.3.6.1.2.1.1");
        assert_eq!(strip_instance("1.3.6.iso"), "1.3.6.iso");
        assert_eq!(strip_instance("42"), "42");
    }

    #[test]
    fn scalar_and_instance_stripping_compose() {
        let oid = "1.3.6.1.4.1.31946.4.2.6.10.1.3";
        assert_eq!(strip_instance(oid), "1.3.6.1.4.1.31946.4.2.6.10.1");
        assert_eq!(strip_scalar("1.3.6.1.4.1.31946.4.2.6.10.1.0"), "1.3.6.1.4.1.31946.4.2.6.10.1");
    }

    #[test]
    fn expansion_is_monotone() {
        let configured = vec![
            "1.3.6.1.4.1.31946.4.2.6.10.1".to_string(),
            "1.3.6.1.2.1.1.5.0".to_string(),
        ];
        let expanded = expand_poll_set(&configured);
        let set = as_set(&expanded);
        for oid in &configured {
            assert!(set.contains(oid), "configured {oid} missing from expansion");
        }
    }

    #[test]
    fn expansion_is_idempotent() {
        let configured = vec![
            "1.3.6.1.4.1.31946.4.2.6.10.1".to_string(),
            "1.3.6.1.4.1.31946.4.2.6.10.13.0".to_string(),
            "1.3.6.1.2.1.1.5".to_string(),
        ];
        let once = expand_poll_set(&configured);
        let twice = expand_poll_set(&once);
        assert_eq!(as_set(&once), as_set(&twice));
    }

    #[test]
    fn elenos_presence_forces_core_bases() {
        let configured = vec!["1.3.6.1.4.1.31946.4.2.6.10.13".to_string()];
        let set = as_set(&expand_poll_set(&configured));
        // Frequency and on-air status polled even though only standby-status
        // was configured.
        assert!(set.contains("1.3.6.1.4.1.31946.4.2.6.10.14.0"));
        assert!(set.contains("1.3.6.1.4.1.31946.4.2.6.10.12.0"));
        assert!(set.contains("1.3.6.1.4.1.31946.4.2.6.10.1.0"));
        assert!(set.contains("1.3.6.1.4.1.31946.4.2.6.10.2.0"));
        // Indexed forms of the configured base.
        assert!(set.contains("1.3.6.1.4.1.31946.4.2.6.10.13.2"));
    }

    #[test]
    fn non_elenos_sets_stay_small() {
        let configured = vec!["1.3.6.1.2.1.1.3.0".to_string()];
        let expanded = expand_poll_set(&configured);
        assert_eq!(expanded, vec!["1.3.6.1.2.1.1.3.0".to_string()]);
    }

    #[test]
    fn normalization_drops_blank_entries() {
        let configured = vec![
            "  ".to_string(),
            "".to_string(),
            " 1.3.6.1.2.1.1.5 ".to_string(),
        ];
        let expanded = expand_poll_set(&configured);
        assert_eq!(
            expanded,
            vec!["1.3.6.1.2.1.1.5".to_string(), "1.3.6.1.2.1.1.5.0".to_string()]
        );
    }

    #[test]
    fn scalar_zero_not_doubled() {
        let configured = vec!["1.3.6.1.2.1.1.5.0".to_string()];
        let expanded = expand_poll_set(&configured);
        assert_eq!(expanded, vec!["1.3.6.1.2.1.1.5.0".to_string()]);
    }
}
