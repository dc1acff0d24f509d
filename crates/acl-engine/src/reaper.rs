//! Garbage collection of unused ACL port groups.
//!
//! After any topology change (ACL detach, network delete, NIC delete) the
//! reaper reclaims every `incus_acl…` port group that no OVN-backed entity
//! references, directly or through the ruleset of another in-use ACL.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use ovn_nb::{NbClient, PortGroupName};

use crate::catalog::{AclUsage, Catalog, CatalogResult};
use crate::error::AclResult;
use crate::naming;
use crate::reconcile::check_cancel;

/// One usage the reaper should pretend has already gone away.
///
/// Useful while the caller is mid-update and the store still carries the
/// config that was just removed. NIC forms name the device; the network form
/// covers the network's own ACL list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreUsage {
    /// Ignore one instance NIC's ACL usage.
    InstanceNic {
        /// Instance name.
        instance: String,
        /// Instance project.
        project: String,
        /// Device name.
        nic_name: String,
    },
    /// Ignore one profile NIC's ACL usage.
    ProfileNic {
        /// Profile name.
        profile: String,
        /// Profile project.
        project: String,
        /// Device name.
        nic_name: String,
    },
    /// Ignore a network's ACL usage.
    Network {
        /// Network name.
        name: String,
    },
}

/// Deletes every ACL port group in the project that is no longer referenced
/// by an OVN-backed entity.
///
/// `keep_acls` are treated as explicitly in use by OVN even if the store
/// says otherwise, which also retains ACLs referenced from their rulesets.
/// Delete failures are logged and left for the next sweep, so the reaper
/// stays safe to run opportunistically.
#[instrument(skip_all, fields(project = %project))]
pub async fn delete_unused_port_groups<C, N>(
    catalog: &C,
    client: &N,
    project: &str,
    ignore_usage: Option<&IgnoreUsage>,
    keep_acls: &[String],
    cancel: &CancellationToken,
) -> AclResult<()>
where
    C: Catalog + ?Sized,
    N: NbClient + ?Sized,
{
    check_cancel(cancel)?;

    let acls = catalog.list_acls(project).await?;
    let acl_names: Vec<String> = acls.iter().map(|acl| acl.name.clone()).collect();
    let acl_ids: HashMap<String, i64> = acls.iter().map(|acl| (acl.name.clone(), acl.id)).collect();

    let project_id = catalog.get_project_id(project).await?;

    check_cancel(cancel)?;
    let port_groups = client.list_port_groups_by_project(project_id).await?;

    // Port groups with a keeper prefix are never candidates; the prefix also
    // covers the per-ACL-per-network groups.
    let keep_prefixes: Vec<String> = keep_acls
        .iter()
        .filter_map(|name| acl_ids.get(name))
        .map(|id| naming::acl_port_group_name(*id).to_string())
        .collect();

    // Initial removal candidates: every ACL related port group in the
    // project. Any found to be in use is dropped from the set below.
    let mut remove_candidates: BTreeSet<PortGroupName> = port_groups
        .into_iter()
        .filter(|pg| {
            pg.as_str().starts_with(naming::ACL_PORT_GROUP_PREFIX)
                && !keep_prefixes
                    .iter()
                    .any(|prefix| pg.as_str().starts_with(prefix.as_str()))
        })
        .collect();

    // Seeding the used set with keep_acls also retains ACLs that only their
    // rulesets reference.
    let mut ovn_used: BTreeSet<String> = keep_acls.iter().cloned().collect();

    // ACLs referenced by the rulesets of other ACLs, with their referrers.
    let mut acl_used_acls: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let ovn_networks: HashMap<String, i64> = catalog
        .list_ovn_networks(project)
        .await?
        .into_iter()
        .map(|net| (net.name, net.id))
        .collect();

    check_cancel(cancel)?;

    {
        let mut mark_used = |matched: &[String], net_id: i64| {
            for acl_name in matched {
                ovn_used.insert(acl_name.clone());

                if let Some(acl_id) = acl_ids.get(acl_name) {
                    remove_candidates.remove(&naming::acl_port_group_name(*acl_id));
                    remove_candidates
                        .remove(&naming::acl_network_port_group_name(*acl_id, net_id));
                }
            }
        };

        let mut visitor = |matched: &[String],
                           usage: &AclUsage,
                           nic_name: Option<&str>,
                           nic_config: Option<&BTreeMap<String, String>>|
         -> CatalogResult<()> {
            match usage {
                AclUsage::Instance { name, project: usage_project } => {
                    if let Some(IgnoreUsage::InstanceNic {
                        instance,
                        project: ignore_project,
                        nic_name: ignore_nic,
                    }) = ignore_usage
                    {
                        // The device the ACLs were just removed from; its DB
                        // record may not reflect the update yet.
                        if instance == name
                            && ignore_project == usage_project
                            && Some(ignore_nic.as_str()) == nic_name
                        {
                            return Ok(());
                        }
                    }

                    let network = nic_config.and_then(|config| config.get("network"));
                    if let Some(net_id) = network.and_then(|net| ovn_networks.get(net.as_str())) {
                        mark_used(matched, *net_id);
                    }
                }
                AclUsage::Profile { name, project: usage_project } => {
                    if let Some(IgnoreUsage::ProfileNic {
                        profile,
                        project: ignore_project,
                        nic_name: ignore_nic,
                    }) = ignore_usage
                    {
                        if profile == name
                            && ignore_project == usage_project
                            && Some(ignore_nic.as_str()) == nic_name
                        {
                            return Ok(());
                        }
                    }

                    let network = nic_config.and_then(|config| config.get("network"));
                    if let Some(net_id) = network.and_then(|net| ovn_networks.get(net.as_str())) {
                        mark_used(matched, *net_id);
                    }
                }
                AclUsage::Network { name } => {
                    if let Some(IgnoreUsage::Network { name: ignore_name }) = ignore_usage {
                        if ignore_name == name {
                            return Ok(());
                        }
                    }

                    if let Some(net_id) = ovn_networks.get(name.as_str()) {
                        mark_used(matched, *net_id);
                    }
                }
                AclUsage::Acl { name } => {
                    for acl_name in matched {
                        let referrers = acl_used_acls.entry(acl_name.clone()).or_default();
                        if !referrers.contains(name) {
                            referrers.push(name.clone());
                        }
                    }
                }
            }

            Ok(())
        };

        catalog.used_by(project, &acl_names, &mut visitor).await?;
    }

    // An ACL referenced only from other rulesets is kept iff any referrer is
    // itself in use by OVN.
    for (acl_name, referrers) in &acl_used_acls {
        if referrers.iter().any(|referrer| ovn_used.contains(referrer)) {
            if let Some(acl_id) = acl_ids.get(acl_name) {
                remove_candidates.remove(&naming::acl_port_group_name(*acl_id));
            }
        }
    }

    if remove_candidates.is_empty() {
        return Ok(());
    }

    for port_group in &remove_candidates {
        debug!(port_group = %port_group, "Scheduled deletion of unused ACL port group");
    }

    check_cancel(cancel)?;
    let names: Vec<PortGroupName> = remove_candidates.into_iter().collect();
    if let Err(err) = client.delete_port_group(&names).await {
        // Leave the groups for the next sweep rather than failing the
        // caller's topology change.
        warn!(error = %err, "Failed deleting unused ACL port groups");
    }

    Ok(())
}
