//! The Northbound client trait consumed by the ACL engine.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::NbResult;
use crate::rule::OvnAclRule;
use crate::types::{PortGroupName, PortGroupUuid, SwitchName, SwitchPortName};

/// Existence and rule status of a port group.
#[derive(Debug, Clone, Default)]
pub struct PortGroupInfo {
    /// UUID of the port group row; empty when the group does not exist.
    pub uuid: PortGroupUuid,
    /// True if the group carries at least one ACL rule.
    pub has_acls: bool,
}

impl PortGroupInfo {
    /// Returns true if the port group exists in the Northbound database.
    pub fn exists(&self) -> bool {
        !self.uuid.is_empty()
    }
}

/// Operations the ACL engine needs from the OVN Northbound database.
///
/// Rule replacement calls are atomic: observers see either the previous or
/// the new complete rule set, never a mixture. Implementations must be safe
/// to share across concurrent reconcile invocations; OVN's own transaction
/// model serializes writers on a given row.
#[async_trait]
pub trait NbClient: Send + Sync {
    /// Looks up a port group, returning its UUID (empty when absent) and
    /// whether it already carries ACL rules.
    async fn get_port_group_info(&self, name: &PortGroupName) -> NbResult<PortGroupInfo>;

    /// Creates a port group owned by the given project.
    ///
    /// When `switch` is set the group is linked to that logical switch by
    /// adding `router_port` as a member; `router_port` must be set alongside
    /// `switch`. `parent` associates the group with its parent ACL group.
    async fn create_port_group(
        &self,
        project_id: i64,
        name: &PortGroupName,
        parent: Option<&PortGroupName>,
        switch: Option<&SwitchName>,
        router_port: Option<&SwitchPortName>,
    ) -> NbResult<()>;

    /// Deletes the named port groups in one batch. Names that do not exist
    /// are skipped silently.
    async fn delete_port_group(&self, names: &[PortGroupName]) -> NbResult<()>;

    /// Lists the names of all port groups owned by a project.
    async fn list_port_groups_by_project(&self, project_id: i64) -> NbResult<Vec<PortGroupName>>;

    /// Atomically replaces the full ACL rule set of a port group.
    ///
    /// When `match_substitutions` is given, each key found in a rule's match
    /// expression is replaced with its value before submission.
    async fn update_port_group_acl_rules(
        &self,
        port_group: &PortGroupName,
        match_substitutions: Option<&HashMap<String, String>>,
        rules: &[OvnAclRule],
    ) -> NbResult<()>;

    /// Replaces only the ACL rules keyed by `(port_group, port)`, leaving
    /// rules for other ports on the same group untouched.
    async fn update_port_group_port_acl_rules(
        &self,
        port_group: &PortGroupName,
        port: &SwitchPortName,
        rules: &[OvnAclRule],
    ) -> NbResult<()>;

    /// Atomically replaces the switch-scoped ACL rule set of a logical
    /// switch.
    async fn update_logical_switch_acl_rules(
        &self,
        switch: &SwitchName,
        rules: &[OvnAclRule],
    ) -> NbResult<()>;
}
