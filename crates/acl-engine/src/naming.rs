//! Naming of OVN entities managed by the ACL engine.
//!
//! OVN only matches port groups named `[a-zA-Z_.][a-zA-Z_.0-9]*`, so port
//! group names use `_` as the separator while switch and switch port names
//! keep the `-` convention of the wider network integration. These formats
//! are load-bearing: the reaper recognizes its own port groups by prefix and
//! peers are resolved through the routes address-set name.

use ovn_nb::{AddressSetName, PortGroupName, SwitchName, SwitchPortName};

/// Prefix of every ACL-related port group.
pub const ACL_PORT_GROUP_PREFIX: &str = "incus_acl";

/// Pseudo port group standing in for the network's internal switch selector.
///
/// Only ever appears inside emitted match strings; replaced per target
/// network at apply time.
pub const PSEUDO_INTERNAL: &str = "__internal__";

/// Pseudo port group standing in for the network's router port selector.
pub const PSEUDO_EXTERNAL: &str = "__external__";

/// Returns the port group name for a Network ACL ID, e.g. `incus_acl7`.
pub fn acl_port_group_name(acl_id: i64) -> PortGroupName {
    PortGroupName::new(format!("{}{}", ACL_PORT_GROUP_PREFIX, acl_id))
}

/// Returns the per-ACL-per-network port group name, e.g. `incus_acl7_net3`.
pub fn acl_network_port_group_name(acl_id: i64, network_id: i64) -> PortGroupName {
    PortGroupName::new(format!(
        "{}{}_net{}",
        ACL_PORT_GROUP_PREFIX, acl_id, network_id
    ))
}

/// Returns the per-network switch port group name, e.g. `incus_net3`.
pub fn int_switch_port_group_name(network_id: i64) -> PortGroupName {
    PortGroupName::new(format!("incus_net{}", network_id))
}

/// Returns the internal switch routes address set prefix for a network,
/// e.g. `incus_net3_routes` (matched as `$incus_net3_routes_ip4` / `_ip6`).
pub fn int_switch_routes_address_set_prefix(network_id: i64) -> AddressSetName {
    AddressSetName::new(format!("{}_routes", int_switch_port_group_name(network_id)))
}

/// Returns the prefix used for OVN entities related to a network,
/// e.g. `incus-net3`.
pub fn network_prefix(network_id: i64) -> String {
    format!("incus-net{}", network_id)
}

/// Returns the internal logical switch name for a network,
/// e.g. `incus-net3-ls-int`.
pub fn int_switch_name(network_id: i64) -> SwitchName {
    SwitchName::new(format!("{}-ls-int", network_prefix(network_id)))
}

/// Returns the router port name on a network's internal switch,
/// e.g. `incus-net3-ls-int-lsp-router`.
pub fn int_switch_router_port_name(network_id: i64) -> SwitchPortName {
    SwitchPortName::new(format!("{}-lsp-router", int_switch_name(network_id)))
}

/// Returns the OVN address set identifier an address-set reference is
/// rewritten to, e.g. `incus_set5` (matched as `$incus_set5_ip4` / `_ip6`).
pub fn address_set_ref(set_id: i64) -> String {
    format!("incus_set{}", set_id)
}
