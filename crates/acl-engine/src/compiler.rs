//! Lowering of Network ACL rules into OVN ACL rule records.
//!
//! The compiler is pure CPU: all reference maps are resolved up front by the
//! reconciler, so compilation either produces the complete rule set for an
//! ACL or fails on the first bad rule with no partial emission.
//!
//! Output is network-agnostic. Rules whose subjects select the internal
//! switch or router port carry the pseudo port groups `@__internal__` /
//! `@__external__`, substituted per target network at apply time.

use std::collections::HashMap;

use ovn_nb::{OvnAclAction, OvnAclRule, PortGroupName};

use crate::error::{AclError, AclResult};
use crate::naming;
use crate::subject::{self, Subject};
use crate::types::{
    AclAction, AclRecord, AclRule, PeerConnection, RuleDirection, RuleProtocol,
    PRIORITY_PORT_GROUP_ALLOW, PRIORITY_PORT_GROUP_DEFAULT_ACTION, PRIORITY_PORT_GROUP_DROP,
    PRIORITY_PORT_GROUP_REJECT,
};

// OVN caps ACL log names at 63 characters.
const MAX_LOG_NAME_LEN: usize = 63;

/// Resolved reference maps needed to compile one ACL.
#[derive(Debug)]
pub struct CompileContext<'a> {
    /// Port group the compiled rules will be applied to.
    pub port_group: &'a PortGroupName,
    /// ACL name to ID map for the project.
    pub acl_ids: &'a HashMap<String, i64>,
    /// Established peer connections to their target network IDs.
    pub peer_targets: &'a HashMap<PeerConnection, i64>,
    /// Address set names (without sigil) to their IDs.
    pub address_sets: &'a HashMap<String, i64>,
}

/// The compiled artifact for one ACL.
#[derive(Debug, Default)]
pub struct CompiledAcl {
    /// Network-agnostic rules for the per-ACL port group, ending with the
    /// catch-all drop.
    pub port_group_rules: Vec<OvnAclRule>,
    /// Rules carrying pseudo selectors, applied per bound network.
    pub network_rules: Vec<OvnAclRule>,
    /// Peer connections the rules depend on; every bound network must own
    /// each of them.
    pub peers_needed: Vec<PeerConnection>,
}

/// Compiles all enabled rules of `acl` into OVN ACL rule records.
pub fn compile(acl: &AclRecord, ctx: &CompileContext<'_>) -> AclResult<CompiledAcl> {
    let mut compiled = CompiledAcl::default();

    convert_rules(RuleDirection::Ingress, &acl.ingress, ctx, &mut compiled)?;
    convert_rules(RuleDirection::Egress, &acl.egress, ctx, &mut compiled)?;

    // Failsafe to drop unmatched traffic if the per-NIC default rule has
    // unexpectedly not kicked in.
    compiled.port_group_rules.push(OvnAclRule {
        direction: "to-lport".to_string(),
        action: OvnAclAction::Drop,
        priority: PRIORITY_PORT_GROUP_DEFAULT_ACTION,
        match_: format!(
            "(inport == @{pg} || outport == @{pg})",
            pg = ctx.port_group
        ),
        log: false,
        log_name: ctx.port_group.to_string(),
    });

    Ok(compiled)
}

fn convert_rules(
    direction: RuleDirection,
    rules: &[AclRule],
    ctx: &CompileContext<'_>,
    compiled: &mut CompiledAcl,
) -> AclResult<()> {
    for (rule_index, rule) in rules.iter().enumerate() {
        if rule.state == crate::types::RuleState::Disabled {
            continue;
        }

        let source = replace_address_set_names(&rule.source, ctx)?;
        let destination = replace_address_set_names(&rule.destination, ctx)?;

        let (mut ovn_rule, network_specific, peers) =
            lower_rule(direction, rule, &source, &destination, ctx)?;

        if rule.state == crate::types::RuleState::Logged {
            let mut log_name = format!("{}-{}-{}", ctx.port_group, direction, rule_index);
            debug_assert!(
                log_name.len() <= MAX_LOG_NAME_LEN,
                "ACL log name {:?} exceeds the OVN 63 character limit",
                log_name
            );
            log_name.truncate(MAX_LOG_NAME_LEN);

            ovn_rule.log = true;
            ovn_rule.log_name = log_name;
        }

        if network_specific {
            compiled.network_rules.push(ovn_rule);
        } else {
            compiled.port_group_rules.push(ovn_rule);
        }

        compiled.peers_needed.extend(peers);
    }

    Ok(())
}

/// Rewrites `$name` address-set references to their OVN identifiers,
/// leaving all other subjects untouched.
fn replace_address_set_names(subject_list: &str, ctx: &CompileContext<'_>) -> AclResult<String> {
    if subject_list.is_empty() {
        return Ok(String::new());
    }

    let mut subjects = Vec::new();
    for token in subject::split_subjects(subject_list) {
        match token.strip_prefix('$') {
            Some(name) => {
                let set_id = ctx
                    .address_sets
                    .get(name)
                    .ok_or_else(|| AclError::reference_not_found(token))?;
                subjects.push(format!("${}", naming::address_set_ref(*set_id)));
            }
            None => subjects.push(token.to_string()),
        }
    }

    Ok(subjects.join(","))
}

fn lower_rule(
    direction: RuleDirection,
    rule: &AclRule,
    source: &str,
    destination: &str,
    ctx: &CompileContext<'_>,
) -> AclResult<(OvnAclRule, bool, Vec<PeerConnection>)> {
    let action = rule
        .action
        .ok_or_else(|| AclError::invalid_rule("Rule has no action"))?;

    let (ovn_action, priority) = match action {
        AclAction::Allow => (OvnAclAction::AllowRelated, PRIORITY_PORT_GROUP_ALLOW),
        AclAction::AllowStateless => (OvnAclAction::AllowStateless, PRIORITY_PORT_GROUP_ALLOW),
        AclAction::Reject => (OvnAclAction::Reject, PRIORITY_PORT_GROUP_REJECT),
        AclAction::Drop => (OvnAclAction::Drop, PRIORITY_PORT_GROUP_DROP),
    };

    let mut network_specific = false;
    let mut peers_needed = Vec::new();

    // Directional port filter so the rule only applies to the ports in the
    // port group.
    let mut match_parts = vec![match direction {
        // Traffic going to the instance.
        RuleDirection::Ingress => format!("outport == @{}", ctx.port_group),
        // Traffic leaving the instance.
        RuleDirection::Egress => format!("inport == @{}", ctx.port_group),
    }];

    if !source.is_empty() {
        let (fragment, net_specific, peers) = subjects_match("src", source, ctx)?;
        network_specific |= net_specific;
        match_parts.push(fragment);
        peers_needed.extend(peers);
    }

    if !destination.is_empty() {
        let (fragment, net_specific, peers) = subjects_match("dst", destination, ctx)?;
        network_specific |= net_specific;
        match_parts.push(fragment);
        peers_needed.extend(peers);
    }

    if let Some(protocol) = rule.protocol {
        match_parts.push(protocol.to_string());

        if protocol.has_ports() {
            if !rule.icmp_type.is_empty() || !rule.icmp_code.is_empty() {
                return Err(AclError::invalid_rule(format!(
                    "ICMP fields are not valid with protocol {:?}",
                    protocol.to_string()
                )));
            }

            if !rule.source_port.is_empty() {
                match_parts.push(ports_match(protocol, "src", &rule.source_port));
            }

            if !rule.destination_port.is_empty() {
                match_parts.push(ports_match(protocol, "dst", &rule.destination_port));
            }
        } else {
            if !rule.source_port.is_empty() || !rule.destination_port.is_empty() {
                return Err(AclError::invalid_rule(format!(
                    "Port fields are not valid with protocol {:?}",
                    protocol.to_string()
                )));
            }

            if !rule.icmp_type.is_empty() {
                match_parts.push(format!("{}.type == {}", protocol, rule.icmp_type));
            }

            if !rule.icmp_code.is_empty() {
                match_parts.push(format!("{}.code == {}", protocol, rule.icmp_code));
            }
        }
    } else if !rule.source_port.is_empty() || !rule.destination_port.is_empty() {
        return Err(AclError::invalid_rule(
            "Port fields require protocol tcp or udp",
        ));
    } else if !rule.icmp_type.is_empty() || !rule.icmp_code.is_empty() {
        return Err(AclError::invalid_rule(
            "ICMP fields require protocol icmp4 or icmp6",
        ));
    }

    let ovn_rule = OvnAclRule {
        direction: "to-lport".to_string(),
        action: ovn_action,
        priority,
        match_: format!("({})", match_parts.join(") && (")),
        log: false,
        log_name: String::new(),
    };

    Ok((ovn_rule, network_specific, peers_needed))
}

/// Converts a comma-separated port criteria list into an OVN match fragment.
fn ports_match(protocol: RuleProtocol, direction: &str, criteria: &str) -> String {
    let mut field_parts = Vec::new();

    for criterion in subject::split_subjects(criteria) {
        match criterion.split_once('-') {
            Some((low, high)) => field_parts.push(format!(
                "({proto}.{dir} >= {low} && {proto}.{dir} <= {high})",
                proto = protocol,
                dir = direction,
            )),
            None => field_parts.push(format!(
                "{proto}.{dir} == {criterion}",
                proto = protocol,
                dir = direction,
            )),
        }
    }

    field_parts.join(" || ")
}

/// Converts a subject criteria list into an OVN match fragment.
///
/// Returns the fragment, whether any subject is network specific, and the
/// peer connections the fragment depends on.
fn subjects_match(
    direction: &str,
    subject_list: &str,
    ctx: &CompileContext<'_>,
) -> AclResult<(String, bool, Vec<PeerConnection>)> {
    let mut field_parts = Vec::new();
    let mut network_specific = false;
    let mut peers_needed = Vec::new();

    let port_type = if direction == "dst" {
        "outport"
    } else {
        "inport"
    };

    for token in subject::split_subjects(subject_list) {
        match subject::classify(token)? {
            Subject::IpRange { start, end } => {
                let proto = if start.is_ipv4() { "ip4" } else { "ip6" };
                field_parts.push(format!(
                    "({proto}.{direction} >= {start} && {proto}.{direction} <= {end})"
                ));
            }
            Subject::Address { ip4, text } => {
                let proto = if ip4 { "ip4" } else { "ip6" };
                field_parts.push(format!("{proto}.{direction} == {text}"));
            }
            Subject::Internal => {
                // Pseudo port group, expanded per network at apply time.
                field_parts.push(format!("{} == @{}", port_type, naming::PSEUDO_INTERNAL));
                network_specific = true;
            }
            Subject::External => {
                field_parts.push(format!("{} == @{}", port_type, naming::PSEUDO_EXTERNAL));
                network_specific = true;
            }
            Subject::AddressSet { name } => {
                field_parts.push(format!(
                    "ip6.{direction} == ${name}_ip6 || ip4.{direction} == ${name}_ip4"
                ));
            }
            Subject::Peer { network, peer } => {
                let connection = PeerConnection::new(network, peer);
                let target_net_id = ctx
                    .peer_targets
                    .get(&connection)
                    .ok_or_else(|| AclError::reference_not_found(token))?;

                let prefix = naming::int_switch_routes_address_set_prefix(*target_net_id);
                field_parts.push(format!(
                    "ip6.{direction} == ${prefix}_ip6 || ip4.{direction} == ${prefix}_ip4"
                ));
                peers_needed.push(connection);
            }
            Subject::AclName { name } => {
                let acl_id = ctx
                    .acl_ids
                    .get(name)
                    .ok_or_else(|| AclError::reference_not_found(name))?;

                field_parts.push(format!(
                    "{} == @{}",
                    port_type,
                    naming::acl_port_group_name(*acl_id)
                ));
            }
        }
    }

    Ok((field_parts.join(" || "), network_specific, peers_needed))
}
