//! Reconciliation of declared ACLs into OVN port groups.
//!
//! [`Reconciler::ensure_acls`] is the write path of the engine: it creates
//! missing port groups (including empty placeholders for referenced ACLs, so
//! rules naming them apply cleanly on first submission), compiles and applies
//! rule sets, and specializes rules per bound network.
//!
//! Failure handling is compensation based rather than exception based: every
//! created port group is pushed onto an explicit stack, and any error (or a
//! cancelled token observed at a suspension point) unwinds that stack in LIFO
//! order before returning. On success the same stack is handed to the caller
//! as an [`AclCleanup`] so a failing later step of a larger operation can
//! still unwind this one.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use ovn_nb::{NbClient, OvnAclAction, OvnAclRule, PortGroupName, SwitchPortName, SwitchPortUuid};

use crate::catalog::{Catalog, CatalogError};
use crate::compiler::{self, CompileContext};
use crate::error::{AclError, AclResult};
use crate::naming;
use crate::resolver;
use crate::types::{
    AclAction, AclRecord, PeerConnection, PRIORITY_NIC_DEFAULT_ACTION_EGRESS,
    PRIORITY_NIC_DEFAULT_ACTION_INGRESS,
};

/// A network an ACL is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkUsage {
    /// Stable network ID.
    pub id: i64,
    /// Network name.
    pub name: String,
}

impl NetworkUsage {
    /// Creates a network usage entry.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Compensation record for the side effects of one `ensure_acls` call.
///
/// Holds the port groups created by the call, in creation order. Reverting
/// deletes them newest-first; delete failures are logged and skipped so the
/// remaining compensations still run.
#[derive(Debug, Default)]
pub struct AclCleanup {
    created_port_groups: Vec<PortGroupName>,
}

impl AclCleanup {
    /// Returns true if the call created nothing that would need undoing.
    pub fn is_empty(&self) -> bool {
        self.created_port_groups.is_empty()
    }

    /// Returns the created port groups in creation order.
    pub fn created_port_groups(&self) -> &[PortGroupName] {
        &self.created_port_groups
    }

    fn push(&mut self, name: PortGroupName) {
        self.created_port_groups.push(name);
    }

    /// Deletes the created port groups in LIFO order.
    pub async fn revert<N: NbClient + ?Sized>(self, client: &N) {
        for name in self.created_port_groups.iter().rev() {
            if let Err(err) = client.delete_port_group(std::slice::from_ref(name)).await {
                warn!(port_group = %name, error = %err, "Failed deleting port group during revert");
            }
        }
    }
}

pub(crate) fn check_cancel(cancel: &CancellationToken) -> AclResult<()> {
    if cancel.is_cancelled() {
        return Err(AclError::Cancelled);
    }

    Ok(())
}

struct CreateStatus {
    name: String,
    acl: AclRecord,
}

struct ExistingStatus {
    name: String,
    // Non-empty when rules must be (re)applied to the existing group.
    acl: Option<AclRecord>,
    add_nets: Vec<NetworkUsage>,
}

/// Drives OVN port-group state for a project's ACLs.
///
/// Re-entrant across projects; callers must serialize `ensure_acls`
/// invocations within one project (typically under the project lock held for
/// the surrounding mutation).
pub struct Reconciler<C, N> {
    catalog: Arc<C>,
    client: Arc<N>,
}

impl<C: Catalog, N: NbClient> Reconciler<C, N> {
    /// Creates a reconciler over the given catalog and Northbound client.
    pub fn new(catalog: Arc<C>, client: Arc<N>) -> Self {
        Self { catalog, client }
    }

    /// Ensures the requested ACLs exist as OVN port groups carrying their
    /// current rules.
    ///
    /// For each pair of `acl_names` × `acl_nets`, the per-ACL-per-network
    /// port group is ensured as well. ACLs referenced by the rules of newly
    /// created ACLs are materialized as empty placeholder port groups. If
    /// `reapply_rules` is true, rules are re-applied to existing groups too;
    /// otherwise an existing group's rules are only (re)loaded when the group
    /// has none (partial setup) or when new per-network groups are added.
    ///
    /// On success returns the [`AclCleanup`] compensation record so the
    /// caller can unwind if a later step of its own transaction fails. On
    /// error every side effect made so far has already been reverted.
    #[instrument(skip_all, fields(project = %project, acls = acl_names.len()))]
    pub async fn ensure_acls(
        &self,
        project: &str,
        acl_names: &[String],
        acl_nets: &[NetworkUsage],
        reapply_rules: bool,
        cancel: &CancellationToken,
    ) -> AclResult<AclCleanup> {
        let mut rollback = AclCleanup::default();

        match self
            .ensure_acls_inner(project, acl_names, acl_nets, reapply_rules, cancel, &mut rollback)
            .await
        {
            Ok(()) => Ok(rollback),
            Err(err) => {
                rollback.revert(self.client.as_ref()).await;
                Err(err)
            }
        }
    }

    async fn ensure_acls_inner(
        &self,
        project: &str,
        acl_names: &[String],
        acl_nets: &[NetworkUsage],
        reapply_rules: bool,
        cancel: &CancellationToken,
        rollback: &mut AclCleanup,
    ) -> AclResult<()> {
        check_cancel(cancel)?;
        let project_id = self.catalog.get_project_id(project).await?;

        // Peer connection mappings across the project's OVN networks. Only
        // established peers (those with a target network) can be matched.
        let mut peer_targets: HashMap<PeerConnection, i64> = HashMap::new();
        for network in self.catalog.list_ovn_networks(project).await? {
            check_cancel(cancel)?;
            for peer in self.catalog.list_peers(network.id).await? {
                if let Some(target) = peer.target_net_id {
                    peer_targets
                        .insert(PeerConnection::new(network.name.clone(), peer.name), target);
                }
            }
        }

        // Every requested ACL name must map to an ID.
        let mut acl_ids: HashMap<String, i64> = HashMap::new();
        for acl in self.catalog.list_acls(project).await? {
            acl_ids.insert(acl.name.clone(), acl.id);
        }

        for name in acl_names {
            if !acl_ids.contains_key(name) {
                return Err(AclError::not_found(format!("Security ACL ID for {:?}", name)));
            }
        }

        // Check which port groups need creating and which exist already.
        let mut create_statuses: Vec<CreateStatus> = Vec::new();
        let mut existing_statuses: Vec<ExistingStatus> = Vec::new();

        for name in acl_names {
            check_cancel(cancel)?;
            let port_group = naming::acl_port_group_name(acl_ids[name]);
            let info = self.client.get_port_group_info(&port_group).await?;

            if !info.exists() {
                let acl = self.catalog.get_acl(project, name).await?;
                create_statuses.push(CreateStatus {
                    name: name.clone(),
                    acl,
                });
                continue;
            }

            let mut add_nets = Vec::new();
            for net in acl_nets {
                let net_port_group = naming::acl_network_port_group_name(acl_ids[name], net.id);
                let net_info = self.client.get_port_group_info(&net_port_group).await?;
                if !net_info.exists() {
                    add_nets.push(net.clone());
                }
            }

            // A group with no rules has only been partially set up: even an
            // ACL with no rules carries at least the default catch-all. Load
            // the ruleset in that case, when reapplying is forced, or when
            // new per-network groups are being added.
            let acl = if reapply_rules || !info.has_acls || !add_nets.is_empty() {
                Some(self.catalog.get_acl(project, name).await?)
            } else {
                None
            };

            existing_statuses.push(ExistingStatus {
                name: name.clone(),
                acl,
                add_nets,
            });
        }

        // Collect ACLs referenced by the rulesets of the ACLs being created
        // (and of reapplied ones, as their references may have changed).
        // Missing referenced groups get created empty, so rules naming them
        // don't trigger OVN errors about unknown port groups; the rules
        // themselves are applied if the referenced ACL is later assigned
        // directly.
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        for status in &create_statuses {
            referenced.extend(resolver::referenced_acl_names(&status.acl));
        }

        if reapply_rules {
            for status in &existing_statuses {
                if let Some(acl) = &status.acl {
                    referenced.extend(resolver::referenced_acl_names(acl));
                }
            }
        }

        // Creation ACLs don't need placeholders for themselves.
        for status in &create_statuses {
            referenced.remove(&status.name);
        }

        for name in &referenced {
            check_cancel(cancel)?;
            let acl_id = acl_ids
                .get(name)
                .ok_or_else(|| AclError::reference_not_found(name))?;

            let port_group = naming::acl_port_group_name(*acl_id);
            let info = self.client.get_port_group_info(&port_group).await?;
            if !info.exists() {
                debug!(acl = %name, port_group = %port_group, "Creating empty referenced ACL port group");
                self.client
                    .create_port_group(project_id, &port_group, None, None, None)
                    .await?;
                rollback.push(port_group);
            }
        }

        // Create the needed port groups, then apply rules to them.
        for status in &create_statuses {
            check_cancel(cancel)?;
            let acl_id = acl_ids[&status.name];
            let port_group = naming::acl_port_group_name(acl_id);
            debug!(acl = %status.name, port_group = %port_group, "Creating ACL port group");

            self.client
                .create_port_group(project_id, &port_group, None, None, None)
                .await?;
            rollback.push(port_group.clone());

            for net in acl_nets {
                let net_port_group = naming::acl_network_port_group_name(acl_id, net.id);
                debug!(acl = %status.name, port_group = %net_port_group, "Creating ACL network port group");

                self.client
                    .create_port_group(
                        project_id,
                        &net_port_group,
                        Some(&port_group),
                        Some(&naming::int_switch_name(net.id)),
                        Some(&naming::int_switch_router_port_name(net.id)),
                    )
                    .await?;
                rollback.push(net_port_group);
            }

            self.apply_to_port_group(
                project,
                &status.acl,
                &port_group,
                &acl_ids,
                acl_nets,
                &peer_targets,
                cancel,
            )
            .await?;
        }

        // Create missing per-network groups on existing ACLs and reapply
        // rules where a ruleset was loaded.
        for status in &existing_statuses {
            check_cancel(cancel)?;
            let acl_id = acl_ids[&status.name];
            let port_group = naming::acl_port_group_name(acl_id);

            for net in &status.add_nets {
                let net_port_group = naming::acl_network_port_group_name(acl_id, net.id);
                debug!(acl = %status.name, port_group = %net_port_group, "Creating ACL network port group");

                self.client
                    .create_port_group(
                        project_id,
                        &net_port_group,
                        Some(&port_group),
                        Some(&naming::int_switch_name(net.id)),
                        Some(&naming::int_switch_router_port_name(net.id)),
                    )
                    .await?;
                rollback.push(net_port_group);
            }

            if let Some(acl) = &status.acl {
                debug!(acl = %status.name, port_group = %port_group, "Applying ACL rules to port group");
                self.apply_to_port_group(
                    project,
                    acl,
                    &port_group,
                    &acl_ids,
                    acl_nets,
                    &peer_targets,
                    cancel,
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Compiles `acl` and replaces the rule sets of its primary port group
    /// and of every bound network's specialized group.
    #[allow(clippy::too_many_arguments)]
    async fn apply_to_port_group(
        &self,
        project: &str,
        acl: &AclRecord,
        port_group: &PortGroupName,
        acl_ids: &HashMap<String, i64>,
        acl_nets: &[NetworkUsage],
        peer_targets: &HashMap<PeerConnection, i64>,
        cancel: &CancellationToken,
    ) -> AclResult<()> {
        check_cancel(cancel)?;

        // Pre-fetch the IDs of every address set the ruleset mentions.
        let mut address_sets: HashMap<String, i64> = HashMap::new();
        for set_name in resolver::collect_address_set_names(acl) {
            let record = self
                .catalog
                .get_address_set(project, &set_name)
                .await
                .map_err(|err| match err {
                    CatalogError::NotFound { .. } => {
                        AclError::reference_not_found(format!("${}", set_name))
                    }
                    other => other.into(),
                })?;
            address_sets.insert(record.name, record.id);
        }

        let compiled = compiler::compile(
            acl,
            &CompileContext {
                port_group,
                acl_ids,
                peer_targets,
                address_sets: &address_sets,
            },
        )?;

        // The ACL may only be applied to networks that own every peer its
        // rules depend on.
        for net in acl_nets {
            for peer in &compiled.peers_needed {
                if peer.network != net.name {
                    return Err(AclError::PeerMissing {
                        network: peer.network.clone(),
                        peer: peer.peer.clone(),
                        applied_to: net.name.clone(),
                    });
                }
            }
        }

        check_cancel(cancel)?;
        self.client
            .update_port_group_acl_rules(port_group, None, &compiled.port_group_rules)
            .await?;

        // Apply the network specific rules to all bound networks, even when
        // the list is empty, so stale specializations are cleared.
        for net in acl_nets {
            check_cancel(cancel)?;
            let net_port_group = naming::acl_network_port_group_name(acl_ids[&acl.name], net.id);
            debug!(acl = %acl.name, network = %net.name, port_group = %net_port_group, "Applying network specific ACL rules");

            let substitutions = HashMap::from([
                (
                    format!("@{}", naming::PSEUDO_INTERNAL),
                    format!("@{}", naming::int_switch_port_group_name(net.id)),
                ),
                (
                    format!("@{}", naming::PSEUDO_EXTERNAL),
                    // The router port is a switch port, not a group, so the
                    // replacement is a quoted name rather than a reference.
                    format!("\"{}\"", naming::int_switch_router_port_name(net.id)),
                ),
            ]);

            self.client
                .update_port_group_acl_rules(
                    &net_port_group,
                    Some(&substitutions),
                    &compiled.network_rules,
                )
                .await?;
        }

        Ok(())
    }
}

fn parse_nic_action(which: &str, action: &str) -> AclResult<OvnAclAction> {
    let parsed: AclAction = action
        .parse()
        .map_err(|_| AclError::invalid_rule(format!("Invalid {} action {:?}", which, action)))?;

    // NIC defaults pass the action through verbatim: a default "allow" is
    // intentionally stateless, unlike ACL rule "allow".
    Ok(match parsed {
        AclAction::Allow => OvnAclAction::Allow,
        AclAction::AllowStateless => OvnAclAction::AllowStateless,
        AclAction::Reject => OvnAclAction::Reject,
        AclAction::Drop => OvnAclAction::Drop,
    })
}

/// Replaces the two per-NIC default rules on the network's switch port
/// group, keyed by the NIC's switch port.
pub async fn apply_nic_defaults<N: NbClient + ?Sized>(
    client: &N,
    switch_port_group: &PortGroupName,
    log_prefix: &str,
    nic_port: &SwitchPortName,
    ingress_action: &str,
    ingress_logged: bool,
    egress_action: &str,
    egress_logged: bool,
) -> AclResult<()> {
    let ingress = parse_nic_action("ingress", ingress_action)?;
    let egress = parse_nic_action("egress", egress_action)?;

    let rules = [
        OvnAclRule {
            direction: "to-lport".to_string(),
            action: egress,
            priority: PRIORITY_NIC_DEFAULT_ACTION_EGRESS,
            // From the NIC.
            match_: format!("inport == \"{}\"", nic_port),
            log: egress_logged,
            log_name: format!("{}-egress", log_prefix),
        },
        OvnAclRule {
            direction: "to-lport".to_string(),
            action: ingress,
            priority: PRIORITY_NIC_DEFAULT_ACTION_INGRESS,
            // To the NIC.
            match_: format!("outport == \"{}\"", nic_port),
            log: ingress_logged,
            log_name: format!("{}-ingress", log_prefix),
        },
    ];

    client
        .update_port_group_port_acl_rules(switch_port_group, nic_port, &rules)
        .await?;

    Ok(())
}

/// Adds the NIC port to the given port groups in the caller-owned change
/// set, used to batch OVN membership updates.
pub fn schedule_nic_to_port_groups(
    port_uuid: &SwitchPortUuid,
    change_set: &mut HashMap<PortGroupName, Vec<SwitchPortUuid>>,
    port_groups: &[PortGroupName],
) {
    for port_group in port_groups {
        change_set
            .entry(port_group.clone())
            .or_default()
            .push(port_uuid.clone());
    }
}
