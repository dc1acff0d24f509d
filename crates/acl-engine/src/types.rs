//! Core ACL types and enums.
//!
//! These replace the stringly-typed rule fields of the user-facing API with
//! type-safe enums, while keeping the on-the-wire spellings intact via
//! `Display`/`FromStr`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// OVN ACL rule priorities. OVN evaluates higher priorities first.

/// Catch-all drop on a port group, lowest priority so it only matches
/// otherwise-unmatched traffic.
pub const PRIORITY_PORT_GROUP_DEFAULT_ACTION: u16 = 0;

/// Per-NIC default ingress action.
pub const PRIORITY_NIC_DEFAULT_ACTION_INGRESS: u16 = 100;

/// Per-NIC default egress action.
///
/// Needs to be more than 10 higher than the ingress priority so that ingress
/// reject rules (OVN adds 10 to their priorities) don't prevent egress rules
/// being tested first.
pub const PRIORITY_NIC_DEFAULT_ACTION_EGRESS: u16 = 111;

/// Switch-level baseline allow rules.
pub const PRIORITY_SWITCH_ALLOW: u16 = 200;

/// Port-group allow rules.
pub const PRIORITY_PORT_GROUP_ALLOW: u16 = 300;

/// Port-group reject rules.
pub const PRIORITY_PORT_GROUP_REJECT: u16 = 400;

/// Port-group drop rules.
pub const PRIORITY_PORT_GROUP_DROP: u16 = 500;

/// Action of a Network ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AclAction {
    /// Allow matching traffic and related return traffic (stateful).
    Allow,
    /// Allow matching traffic without connection tracking.
    AllowStateless,
    /// Reject with an RST/ICMP response.
    Reject,
    /// Silently drop.
    Drop,
}

impl AclAction {
    /// All valid actions, in the spelling used by rule configs.
    pub const VALID_ACTIONS: [&'static str; 4] = ["allow", "allow-stateless", "reject", "drop"];
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::AllowStateless => write!(f, "allow-stateless"),
            Self::Reject => write!(f, "reject"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for AclAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "allow-stateless" => Ok(Self::AllowStateless),
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            _ => Err(format!("Unknown ACL action: {}", s)),
        }
    }
}

/// State of a Network ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    /// Rule is active.
    #[default]
    Enabled,
    /// Rule is ignored entirely.
    Disabled,
    /// Rule is active and matched packets are logged.
    Logged,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Logged => write!(f, "logged"),
        }
    }
}

impl FromStr for RuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            "logged" => Ok(Self::Logged),
            _ => Err(format!("Unknown rule state: {}", s)),
        }
    }
}

/// L4/ICMP protocol selector of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    Tcp,
    Udp,
    Icmp4,
    Icmp6,
}

impl RuleProtocol {
    /// Returns true for the connection-oriented protocols that accept port
    /// criteria.
    pub fn has_ports(&self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }

    /// Returns true for the ICMP protocols that accept type/code criteria.
    pub fn is_icmp(&self) -> bool {
        matches!(self, Self::Icmp4 | Self::Icmp6)
    }
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Icmp4 => write!(f, "icmp4"),
            Self::Icmp6 => write!(f, "icmp6"),
        }
    }
}

impl FromStr for RuleProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "icmp4" => Ok(Self::Icmp4),
            "icmp6" => Ok(Self::Icmp6),
            _ => Err(format!("Unknown rule protocol: {}", s)),
        }
    }
}

/// Direction of a rule list within an ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleDirection {
    /// Traffic going to the instance.
    Ingress,
    /// Traffic leaving the instance.
    Egress,
}

impl fmt::Display for RuleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// A single Network ACL rule as stored in the catalog.
///
/// `source`/`destination` are comma-separated subject lists; the port fields
/// are comma-separated singles or `lo-hi` ranges and are only meaningful for
/// tcp/udp, as icmp_type/icmp_code are for icmp4/icmp6.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclRule {
    /// Rule action.
    pub action: Option<AclAction>,
    /// Rule state; absent means enabled.
    #[serde(default)]
    pub state: RuleState,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Comma-separated source subjects.
    #[serde(default)]
    pub source: String,
    /// Comma-separated destination subjects.
    #[serde(default)]
    pub destination: String,
    /// Protocol selector.
    #[serde(default)]
    pub protocol: Option<RuleProtocol>,
    /// Comma-separated source port criteria (tcp/udp only).
    #[serde(default)]
    pub source_port: String,
    /// Comma-separated destination port criteria (tcp/udp only).
    #[serde(default)]
    pub destination_port: String,
    /// ICMP type number (icmp4/icmp6 only).
    #[serde(default)]
    pub icmp_type: String,
    /// ICMP code number (icmp4/icmp6 only).
    #[serde(default)]
    pub icmp_code: String,
}

impl AclRule {
    /// Creates an enabled rule with the given action.
    pub fn new(action: AclAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }
}

/// A Network ACL record as stored in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclRecord {
    /// Stable integer identity.
    pub id: i64,
    /// Owning project.
    pub project: String,
    /// Name, unique within the project.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Free-form config map.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Ordered ingress rules.
    #[serde(default)]
    pub ingress: Vec<AclRule>,
    /// Ordered egress rules.
    #[serde(default)]
    pub egress: Vec<AclRule>,
}

/// Validates an ACL name against the OVN-compatible charset
/// `[a-zA-Z_.][a-zA-Z_.0-9]*`.
pub fn validate_acl_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| "ACL name must not be empty".to_string())?;

    if !(first.is_ascii_alphabetic() || first == '_' || first == '.') {
        return Err(format!("Invalid first character in ACL name {:?}", name));
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(format!("Invalid character in ACL name {:?}", name));
    }

    Ok(())
}

/// A cross-network peer connection `(network, peer)` within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerConnection {
    /// Name of the network that owns the peering.
    pub network: String,
    /// Peer name on that network.
    pub peer: String,
}

impl PeerConnection {
    /// Creates a peer connection key.
    pub fn new(network: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            peer: peer.into(),
        }
    }
}

impl fmt::Display for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.peer)
    }
}
