//! Classification of rule subject tokens.
//!
//! A subject is one comma-separated token of a rule's `source` or
//! `destination` list. Classification order matters: IP forms win over
//! reserved aliases, which win over sigil-prefixed references, and anything
//! left over is taken as an ACL name.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::{AclError, AclResult};

/// Canonical spelling of the switch-internal port selector alias.
pub const RULE_SUBJECT_INTERNAL: &str = "@internal";

/// Canonical spelling of the router (external) port selector alias.
pub const RULE_SUBJECT_EXTERNAL: &str = "@external";

/// Accepted spellings of the internal alias; `#internal` is the legacy form.
pub const RULE_SUBJECT_INTERNAL_ALIASES: [&str; 2] = ["@internal", "#internal"];

/// Accepted spellings of the external alias; `#external` is the legacy form.
pub const RULE_SUBJECT_EXTERNAL_ALIASES: [&str; 2] = ["@external", "#external"];

/// A classified subject token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject<'a> {
    /// Inclusive IP range `A-B`, both endpoints of the same family.
    IpRange {
        /// Range start.
        start: IpAddr,
        /// Range end.
        end: IpAddr,
    },
    /// A single IP address or CIDR, used verbatim in the match.
    Address {
        /// True for IPv4, false for IPv6.
        ip4: bool,
        /// The token as written.
        text: &'a str,
    },
    /// The `@internal` switch-internal port selector.
    Internal,
    /// The `@external` router port selector.
    External,
    /// An address-set reference, name without the `$` sigil.
    AddressSet {
        /// Address set name.
        name: &'a str,
    },
    /// A cross-network peer reference `@network/peer`.
    Peer {
        /// Network that owns the peering.
        network: &'a str,
        /// Peer name.
        peer: &'a str,
    },
    /// A bare identifier naming another ACL in the same project.
    AclName {
        /// The referenced ACL name.
        name: &'a str,
    },
}

/// Splits a comma-separated subject list into trimmed, non-empty tokens.
pub fn split_subjects(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses `A-B` as an IP range if the first segment is an IP address.
///
/// Returns `Ok(None)` when the token is not range-shaped at all, and an
/// error when it is range-shaped but malformed or mixed-family.
fn parse_range(token: &str) -> AclResult<Option<(IpAddr, IpAddr)>> {
    let Some((start_text, end_text)) = token.split_once('-') else {
        return Ok(None);
    };

    let Ok(start) = start_text.parse::<IpAddr>() else {
        return Ok(None);
    };

    let end: IpAddr = end_text
        .parse()
        .map_err(|_| AclError::invalid_rule(format!("Invalid IP range {:?}", token)))?;

    if start.is_ipv4() != end.is_ipv4() {
        return Err(AclError::invalid_rule(format!(
            "Mixed address families in IP range {:?}",
            token
        )));
    }

    Ok(Some((start, end)))
}

/// Classifies one subject token.
pub fn classify(token: &str) -> AclResult<Subject<'_>> {
    if let Some((start, end)) = parse_range(token)? {
        return Ok(Subject::IpRange { start, end });
    }

    if let Ok(ip) = token.parse::<IpAddr>() {
        return Ok(Subject::Address {
            ip4: ip.is_ipv4(),
            text: token,
        });
    }

    if token.contains('/') && !token.starts_with('@') {
        if let Ok(net) = token.parse::<IpNetwork>() {
            return Ok(Subject::Address {
                ip4: matches!(net, IpNetwork::V4(_)),
                text: token,
            });
        }
    }

    if RULE_SUBJECT_INTERNAL_ALIASES.contains(&token) {
        return Ok(Subject::Internal);
    }

    if RULE_SUBJECT_EXTERNAL_ALIASES.contains(&token) {
        return Ok(Subject::External);
    }

    if let Some(name) = token.strip_prefix('$') {
        return Ok(Subject::AddressSet { name });
    }

    if let Some(rest) = token.strip_prefix('@') {
        let Some((network, peer)) = rest.split_once('/') else {
            return Err(AclError::invalid_rule(format!(
                "Cannot parse subject as peer {:?}",
                token
            )));
        };

        return Ok(Subject::Peer { network, peer });
    }

    Ok(Subject::AclName { name: token })
}

/// Returns true if the token is anything other than an ACL name reference.
///
/// Used by the reference resolver to skip subjects that are never ACL names;
/// malformed tokens are also skipped here and surface later in compilation.
pub fn is_non_acl_subject(token: &str) -> bool {
    !matches!(classify(token), Ok(Subject::AclName { .. }))
}
