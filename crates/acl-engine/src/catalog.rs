//! Read-only catalog of ACLs, networks, projects, address sets and peers.
//!
//! The engine never mutates this state; it belongs to the surrounding
//! manager's relational store. Every trait method is expected to run inside
//! a short-lived read transaction of that store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::resolver;
use crate::types::AclRecord;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors surfaced by a [`Catalog`] implementation.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// An expected record is absent.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing record.
        what: String,
    },

    /// Uniqueness violation.
    #[error("Already exists: {what}")]
    Conflict {
        /// Description of the conflicting record.
        what: String,
    },

    /// A query filter was malformed.
    #[error("Invalid filter: {reason}")]
    InvalidFilter {
        /// What is wrong with the filter.
        reason: String,
    },
}

impl CatalogError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// An OVN network within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    /// Stable network ID.
    pub id: i64,
    /// Network name, unique within the project.
    pub name: String,
}

/// A peering declared on a network.
///
/// Only peers with a populated `target_net_id` have completed both sides of
/// the handshake and are usable for `@peer/network` rule subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer name, unique on its network.
    pub name: String,
    /// ID of the network the peer points at, once established.
    pub target_net_id: Option<i64>,
}

/// A named address set within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSetRecord {
    /// Stable address set ID.
    pub id: i64,
    /// Address set name.
    pub name: String,
    /// Member addresses.
    pub addresses: Vec<String>,
}

/// The kind of entity referencing an ACL, reported by [`Catalog::used_by`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclUsage {
    /// An instance NIC references the ACL.
    Instance {
        /// Instance name.
        name: String,
        /// Instance project.
        project: String,
    },
    /// A profile NIC references the ACL.
    Profile {
        /// Profile name.
        name: String,
        /// Profile project.
        project: String,
    },
    /// A network's ACL list references the ACL.
    Network {
        /// Network name.
        name: String,
    },
    /// Another ACL's ruleset references the ACL.
    Acl {
        /// Referring ACL name.
        name: String,
    },
}

/// Visitor invoked by [`Catalog::used_by`] for every referencing entity.
///
/// Arguments: the matched ACL names, the referencing entity, and for NIC
/// usages the device name and device config.
pub type UsedByVisitor<'a> = &'a mut (dyn FnMut(
    &[String],
    &AclUsage,
    Option<&str>,
    Option<&BTreeMap<String, String>>,
) -> CatalogResult<()>
             + Send);

/// Typed read access to the manager's store, scoped to one snapshot.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Loads one ACL by project and name.
    async fn get_acl(&self, project: &str, name: &str) -> CatalogResult<AclRecord>;

    /// Lists all ACLs in a project.
    async fn list_acls(&self, project: &str) -> CatalogResult<Vec<AclRecord>>;

    /// Resolves a project name to its stable ID.
    async fn get_project_id(&self, project: &str) -> CatalogResult<i64>;

    /// Lists the created OVN networks of a project.
    async fn list_ovn_networks(&self, project: &str) -> CatalogResult<Vec<NetworkRecord>>;

    /// Lists the peers declared on a network.
    async fn list_peers(&self, network_id: i64) -> CatalogResult<Vec<PeerRecord>>;

    /// Loads one address set by project and name (without the `$` sigil).
    async fn get_address_set(&self, project: &str, name: &str) -> CatalogResult<AddressSetRecord>;

    /// Invokes `visitor` for every entity referencing any of `acl_names`.
    ///
    /// Covers instance NICs, profile NICs, networks, and ACLs whose rulesets
    /// name one of the queried ACLs.
    async fn used_by(
        &self,
        project: &str,
        acl_names: &[String],
        visitor: UsedByVisitor<'_>,
    ) -> CatalogResult<()>;
}

#[derive(Debug, Clone)]
struct NetworkRow {
    id: i64,
    name: String,
    kind: String,
}

#[derive(Debug, Clone)]
struct AddressSetRow {
    id: i64,
    name: String,
    // Stored the way the real column stores it: a JSON-encoded array.
    addresses_json: String,
}

#[derive(Debug, Clone)]
struct UsageRow {
    matched_acls: Vec<String>,
    usage: AclUsage,
    nic_name: Option<String>,
    nic_config: Option<BTreeMap<String, String>>,
}

#[derive(Default)]
struct CatalogData {
    projects: BTreeMap<String, i64>,
    acls: BTreeMap<(String, String), AclRecord>,
    networks: BTreeMap<String, Vec<NetworkRow>>,
    peers: BTreeMap<i64, Vec<PeerRecord>>,
    address_sets: BTreeMap<(String, String), AddressSetRow>,
    usages: BTreeMap<String, Vec<UsageRow>>,
}

/// In-memory [`Catalog`] for tests and embedding.
///
/// Instance, profile and network usages are registered explicitly;
/// ACL-to-ACL usages are derived from the stored rulesets, like the real
/// store derives them from config.
#[derive(Default)]
pub struct MemoryCatalog {
    data: RwLock<CatalogData>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project.
    pub fn add_project(&self, name: &str, id: i64) {
        self.data
            .write()
            .unwrap()
            .projects
            .insert(name.to_string(), id);
    }

    /// Registers an ACL record under its project.
    pub fn add_acl(&self, acl: AclRecord) {
        self.data
            .write()
            .unwrap()
            .acls
            .insert((acl.project.clone(), acl.name.clone()), acl);
    }

    /// Registers a network of the given kind (`"ovn"` networks are the ones
    /// visible through [`Catalog::list_ovn_networks`]).
    pub fn add_network(&self, project: &str, id: i64, name: &str, kind: &str) {
        self.data
            .write()
            .unwrap()
            .networks
            .entry(project.to_string())
            .or_default()
            .push(NetworkRow {
                id,
                name: name.to_string(),
                kind: kind.to_string(),
            });
    }

    /// Registers a peer on a network.
    pub fn add_peer(&self, network_id: i64, name: &str, target_net_id: Option<i64>) {
        self.data
            .write()
            .unwrap()
            .peers
            .entry(network_id)
            .or_default()
            .push(PeerRecord {
                name: name.to_string(),
                target_net_id,
            });
    }

    /// Registers an address set. Addresses are stored JSON-encoded, the way
    /// the real address-set table stores its single addresses column.
    pub fn add_address_set(&self, project: &str, id: i64, name: &str, addresses: &[&str]) {
        let addresses_json =
            serde_json::to_string(addresses).expect("string arrays always encode");
        self.data
            .write()
            .unwrap()
            .address_sets
            .insert(
                (project.to_string(), name.to_string()),
                AddressSetRow {
                    id,
                    name: name.to_string(),
                    addresses_json,
                },
            );
    }

    /// Registers an instance/profile/network usage of one or more ACLs.
    pub fn add_usage(
        &self,
        project: &str,
        matched_acls: &[&str],
        usage: AclUsage,
        nic_name: Option<&str>,
        nic_config: Option<BTreeMap<String, String>>,
    ) {
        self.data
            .write()
            .unwrap()
            .usages
            .entry(project.to_string())
            .or_default()
            .push(UsageRow {
                matched_acls: matched_acls.iter().map(|s| s.to_string()).collect(),
                usage,
                nic_name: nic_name.map(|s| s.to_string()),
                nic_config,
            });
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_acl(&self, project: &str, name: &str) -> CatalogResult<AclRecord> {
        self.data
            .read()
            .unwrap()
            .acls
            .get(&(project.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("Network ACL {:?}", name)))
    }

    async fn list_acls(&self, project: &str) -> CatalogResult<Vec<AclRecord>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .acls
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, acl)| acl.clone())
            .collect())
    }

    async fn get_project_id(&self, project: &str) -> CatalogResult<i64> {
        self.data
            .read()
            .unwrap()
            .projects
            .get(project)
            .copied()
            .ok_or_else(|| CatalogError::not_found(format!("Project {:?}", project)))
    }

    async fn list_ovn_networks(&self, project: &str) -> CatalogResult<Vec<NetworkRecord>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .networks
            .get(project)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.kind == "ovn")
                    .map(|row| NetworkRecord {
                        id: row.id,
                        name: row.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_peers(&self, network_id: i64) -> CatalogResult<Vec<PeerRecord>> {
        Ok(self
            .data
            .read()
            .unwrap()
            .peers
            .get(&network_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_address_set(&self, project: &str, name: &str) -> CatalogResult<AddressSetRecord> {
        let data = self.data.read().unwrap();
        let row = data
            .address_sets
            .get(&(project.to_string(), name.to_string()))
            .ok_or_else(|| CatalogError::not_found(format!("Address set {:?}", name)))?;

        let addresses: Vec<String> =
            serde_json::from_str(&row.addresses_json).map_err(|e| CatalogError::InvalidFilter {
                reason: format!("Failed decoding addresses of set {:?}: {}", name, e),
            })?;

        Ok(AddressSetRecord {
            id: row.id,
            name: row.name.clone(),
            addresses,
        })
    }

    async fn used_by(
        &self,
        project: &str,
        acl_names: &[String],
        visitor: UsedByVisitor<'_>,
    ) -> CatalogResult<()> {
        // Clone the rows out so the visitor can re-enter the catalog.
        let (usages, acls) = {
            let data = self.data.read().unwrap();
            let usages = data.usages.get(project).cloned().unwrap_or_default();
            let acls: Vec<AclRecord> = data
                .acls
                .iter()
                .filter(|((p, _), _)| p == project)
                .map(|(_, acl)| acl.clone())
                .collect();
            (usages, acls)
        };

        for row in &usages {
            let matched: Vec<String> = row
                .matched_acls
                .iter()
                .filter(|name| acl_names.contains(name))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }

            visitor(
                &matched,
                &row.usage,
                row.nic_name.as_deref(),
                row.nic_config.as_ref(),
            )?;
        }

        // ACL-to-ACL references are derived from the stored rulesets.
        for acl in &acls {
            let referenced = resolver::referenced_acl_names(acl);
            let matched: Vec<String> = referenced
                .into_iter()
                .filter(|name| acl_names.contains(name))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let usage = AclUsage::Acl {
                name: acl.name.clone(),
            };
            visitor(&matched, &usage, None, None)?;
        }

        Ok(())
    }
}
