//! Parsing of OVN ACL log lines.
//!
//! OVN logs one pipe-delimited line per logged ACL hit. The `/log` read
//! endpoint re-formats the lines that belong to a given ACL into JSON
//! entries; anything else (foreign subsystems, other ACLs, malformed lines)
//! is discarded.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One re-formatted ACL log entry.
///
/// Serializes to `{time, proto, src, dst, src_port?, dst_port?, icmp_type?,
/// icmp_code?, action}` with `time` in RFC 3339 UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Event time, RFC 3339 UTC.
    pub time: String,
    /// Protocol name as logged by OVN.
    pub proto: String,
    /// Source address.
    pub src: String,
    /// Destination address.
    pub dst: String,
    /// Source port, when the protocol has ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<String>,
    /// Destination port, when the protocol has ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<String>,
    /// ICMP type, when the protocol is ICMP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<String>,
    /// ICMP code, when the protocol is ICMP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<String>,
    /// OVN verdict (allow, drop, reject...).
    pub action: String,
}

/// Parses one OVN log line, keeping only ACL entries whose log name starts
/// with `prefix`. Returns `None` for anything that does not match.
pub fn parse_log_entry(input: &str, prefix: &str) -> Option<LogEntry> {
    let fields: Vec<&str> = input.split('|').collect();

    // Skip unknown formatting.
    if fields.len() != 5 {
        return None;
    }

    // We only care about ACLs.
    if !fields[2].starts_with("acl_log") {
        return None;
    }

    // Parse the key=value attribute list.
    let mut attrs: HashMap<&str, &str> = HashMap::new();
    for entry in fields[4].split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let pair: Vec<&str> = entry.split('=').collect();
        if pair.len() != 2 {
            continue;
        }

        attrs.insert(pair[0].trim_matches('"'), pair[1].trim_matches('"'));
    }

    // Filter for our ACL.
    if !attrs
        .get("name")
        .is_some_and(|name| name.starts_with(prefix))
    {
        return None;
    }

    let time = DateTime::parse_from_rfc3339(fields[0]).ok()?;

    // The direction attribute carries "<pipeline> <protocol>".
    let direction_fields: Vec<&str> = attrs.get("direction")?.split(' ').collect();
    if direction_fields.len() != 2 {
        return None;
    }

    let src = attrs
        .get("nw_src")
        .or_else(|| attrs.get("ipv6_src"))?
        .to_string();
    let dst = attrs
        .get("nw_dst")
        .or_else(|| attrs.get("ipv6_dst"))?
        .to_string();

    let non_empty = |key: &str| -> Option<String> {
        attrs
            .get(key)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    };

    Some(LogEntry {
        time: time
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        proto: direction_fields[1].to_string(),
        src,
        dst,
        src_port: non_empty("tp_src"),
        dst_port: non_empty("tp_dst"),
        icmp_type: non_empty("icmp_type"),
        icmp_code: non_empty("icmp_code"),
        action: attrs.get("verdict").unwrap_or(&"").to_string(),
    })
}

/// Like [`parse_log_entry`] but returns the JSON encoding, or the empty
/// string for non-matching lines (callers filter those out).
pub fn parse_log_entry_json(input: &str, prefix: &str) -> String {
    parse_log_entry(input, prefix)
        .and_then(|entry| serde_json::to_string(&entry).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_LINE: &str = "2024-03-01T10:00:00+01:00|00007|acl_log(ovn_pipeline)|INFO|name=\"incus_acl7-ingress-0\", verdict=drop, severity=info, direction=\"to-lport tcp\", nw_src=10.0.0.2, nw_dst=10.0.0.3, tp_src=33000, tp_dst=80";

    #[test]
    fn test_parse_tcp_entry() {
        let entry = parse_log_entry(TCP_LINE, "incus_acl7").unwrap();
        assert_eq!(entry.time, "2024-03-01T09:00:00Z");
        assert_eq!(entry.proto, "tcp");
        assert_eq!(entry.src, "10.0.0.2");
        assert_eq!(entry.dst, "10.0.0.3");
        assert_eq!(entry.src_port.as_deref(), Some("33000"));
        assert_eq!(entry.dst_port.as_deref(), Some("80"));
        assert_eq!(entry.icmp_type, None);
        assert_eq!(entry.action, "drop");
    }

    #[test]
    fn test_parse_icmp6_entry() {
        let line = "2024-03-01T09:00:00Z|00008|acl_log(ovn_pipeline)|INFO|name=\"incus_acl7-egress-2\", verdict=allow, severity=info, direction=\"from-lport icmp6\", ipv6_src=fd42::2, ipv6_dst=fd42::3, icmp_type=128, icmp_code=0";

        let entry = parse_log_entry(line, "incus_acl7").unwrap();
        assert_eq!(entry.proto, "icmp6");
        assert_eq!(entry.src, "fd42::2");
        assert_eq!(entry.dst, "fd42::3");
        assert_eq!(entry.icmp_type.as_deref(), Some("128"));
        assert_eq!(entry.icmp_code.as_deref(), Some("0"));
        assert_eq!(entry.src_port, None);
        assert_eq!(entry.action, "allow");
    }

    #[test]
    fn test_foreign_lines_are_skipped() {
        // Wrong field count.
        assert!(parse_log_entry("not a log line", "incus_acl7").is_none());

        // Not an ACL log module.
        let line = "2024-03-01T09:00:00Z|00007|vlog|INFO|name=\"incus_acl7-ingress-0\", direction=\"to-lport tcp\", nw_src=1.2.3.4, nw_dst=5.6.7.8";
        assert!(parse_log_entry(line, "incus_acl7").is_none());

        // Different ACL prefix.
        assert!(parse_log_entry(TCP_LINE, "incus_acl9").is_none());

        // Unparsable timestamp.
        let line = TCP_LINE.replace("2024-03-01T10:00:00+01:00", "yesterday");
        assert!(parse_log_entry(&line, "incus_acl7").is_none());
    }

    #[test]
    fn test_json_shape() {
        let json = parse_log_entry_json(TCP_LINE, "incus_acl7");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["time"], "2024-03-01T09:00:00Z");
        assert_eq!(value["proto"], "tcp");
        assert_eq!(value["src"], "10.0.0.2");
        assert_eq!(value["dst"], "10.0.0.3");
        assert_eq!(value["src_port"], "33000");
        assert_eq!(value["dst_port"], "80");
        assert_eq!(value["action"], "drop");
        assert!(value.get("icmp_type").is_none());
    }

    #[test]
    fn test_non_matching_json_is_empty_string() {
        assert_eq!(parse_log_entry_json("garbage", "incus_acl7"), "");
    }
}
