//! The ACL rule record submitted to the OVN Northbound database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// OVN `tcp.flags` bit for FIN.
pub const TCP_FIN: u16 = 0x001;
/// OVN `tcp.flags` bit for SYN.
pub const TCP_SYN: u16 = 0x002;
/// OVN `tcp.flags` bit for RST.
pub const TCP_RST: u16 = 0x004;
/// OVN `tcp.flags` bit for ACK.
pub const TCP_ACK: u16 = 0x010;

/// Action of an OVN ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OvnAclAction {
    /// Allow the packet, no connection tracking.
    Allow,
    /// Allow the packet and related return traffic (stateful).
    AllowRelated,
    /// Allow the packet, explicitly bypassing connection tracking.
    AllowStateless,
    /// Reject with RST/ICMP unreachable.
    Reject,
    /// Silently drop.
    Drop,
}

impl fmt::Display for OvnAclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::AllowRelated => write!(f, "allow-related"),
            Self::AllowStateless => write!(f, "allow-stateless"),
            Self::Reject => write!(f, "reject"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for OvnAclAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "allow-related" => Ok(Self::AllowRelated),
            "allow-stateless" => Ok(Self::AllowStateless),
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            _ => Err(format!("Unknown OVN ACL action: {}", s)),
        }
    }
}

/// A single ACL rule as stored on a port group or logical switch.
///
/// `direction` is always `to-lport` so that both `inport` and `outport` are
/// available in the match expression; directionality is expressed inside the
/// match itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvnAclRule {
    /// OVN pipeline direction, `to-lport` for every rule we emit.
    pub direction: String,
    /// Rule action.
    pub action: OvnAclAction,
    /// Rule priority; OVN evaluates higher priorities first.
    pub priority: u16,
    /// OVN match expression.
    #[serde(rename = "match")]
    pub match_: String,
    /// Whether matched packets are logged.
    pub log: bool,
    /// Name used in log output (OVN caps this at 63 characters).
    pub log_name: String,
}

impl OvnAclRule {
    /// Creates an unlogged rule in the `to-lport` direction.
    pub fn new(action: OvnAclAction, priority: u16, match_: impl Into<String>) -> Self {
        Self {
            direction: "to-lport".to_string(),
            action,
            priority,
            match_: match_.into(),
            log: false,
            log_name: String::new(),
        }
    }

    /// Enables logging under the given log name.
    pub fn with_log(mut self, log_name: impl Into<String>) -> Self {
        self.log = true;
        self.log_name = log_name.into();
        self
    }
}
