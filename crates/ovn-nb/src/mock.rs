//! In-memory Northbound client for tests.
//!
//! [`MockNbClient`] keeps the Northbound state in plain maps, records every
//! call for assertions, and supports one-shot fault injection so rollback
//! paths can be exercised deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{NbClient, PortGroupInfo};
use crate::error::{NbError, NbOpKind, NbResult};
use crate::rule::OvnAclRule;
use crate::types::{PortGroupName, PortGroupUuid, SwitchName, SwitchPortName};

/// A port group row as stored by the mock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockPortGroup {
    /// Row UUID, assigned at creation.
    pub uuid: PortGroupUuid,
    /// Owning project.
    pub project_id: i64,
    /// Parent ACL port group, if any.
    pub parent: Option<PortGroupName>,
    /// Logical switch the group is linked to, if any.
    pub switch: Option<SwitchName>,
    /// Member switch ports.
    pub members: Vec<SwitchPortName>,
    /// Group-scoped ACL rules.
    pub rules: Vec<OvnAclRule>,
    /// Per-port ACL rules keyed by switch port.
    pub port_rules: BTreeMap<SwitchPortName, Vec<OvnAclRule>>,
}

/// Complete copy of the mock Northbound state, for before/after comparisons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockSnapshot {
    /// All port groups by name.
    pub port_groups: BTreeMap<PortGroupName, MockPortGroup>,
    /// Switch-scoped rules by switch name.
    pub switch_rules: BTreeMap<SwitchName, Vec<OvnAclRule>>,
}

struct ArmedFault {
    operation: String,
    remaining_skips: u32,
}

#[derive(Default)]
struct MockState {
    port_groups: BTreeMap<PortGroupName, MockPortGroup>,
    switch_rules: BTreeMap<SwitchName, Vec<OvnAclRule>>,
    calls: Vec<String>,
    failures: Vec<ArmedFault>,
    next_uuid: u64,
}

impl MockState {
    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    /// Consumes a pending injected failure targeting the given operation,
    /// honouring its skip count.
    fn take_failure(&mut self, operation: &str, kind: NbOpKind) -> Option<NbError> {
        let index = self
            .failures
            .iter()
            .position(|fault| fault.operation == operation)?;

        if self.failures[index].remaining_skips > 0 {
            self.failures[index].remaining_skips -= 1;
            return None;
        }

        self.failures.remove(index);
        Some(match kind {
            NbOpKind::Read => NbError::api_read(operation, "injected fault"),
            NbOpKind::Write => NbError::api_write(operation, "injected fault"),
        })
    }
}

/// In-memory [`NbClient`] implementation.
#[derive(Default)]
pub struct MockNbClient {
    state: Mutex<MockState>,
}

impl MockNbClient {
    /// Creates an empty mock Northbound database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot fault: the next call of `operation` fails with an
    /// API error.
    pub fn fail_next(&self, operation: &str) {
        self.fail_after(operation, 0);
    }

    /// Arms a one-shot fault that lets `skip` calls of `operation` succeed
    /// and fails the one after.
    pub fn fail_after(&self, operation: &str, skip: u32) {
        self.state.lock().unwrap().failures.push(ArmedFault {
            operation: operation.to_string(),
            remaining_skips: skip,
        });
    }

    /// Returns a copy of a port group row, if present.
    pub fn port_group(&self, name: &PortGroupName) -> Option<MockPortGroup> {
        self.state.lock().unwrap().port_groups.get(name).cloned()
    }

    /// Returns the switch-scoped rules of a logical switch.
    pub fn switch_acl_rules(&self, switch: &SwitchName) -> Vec<OvnAclRule> {
        self.state
            .lock()
            .unwrap()
            .switch_rules
            .get(switch)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every call made so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Returns the number of mutating calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| !c.starts_with("get_") && !c.starts_with("list_"))
            .count()
    }

    /// Forgets the recorded call history.
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Takes a full copy of the Northbound state.
    pub fn snapshot(&self) -> MockSnapshot {
        let state = self.state.lock().unwrap();
        MockSnapshot {
            port_groups: state.port_groups.clone(),
            switch_rules: state.switch_rules.clone(),
        }
    }
}

/// Applies match substitutions to a rule the way the real client does before
/// submitting a transaction.
fn substitute(rule: &OvnAclRule, substitutions: Option<&HashMap<String, String>>) -> OvnAclRule {
    let mut rule = rule.clone();
    if let Some(map) = substitutions {
        for (from, to) in map {
            rule.match_ = rule.match_.replace(from.as_str(), to.as_str());
        }
    }

    rule
}

#[async_trait]
impl NbClient for MockNbClient {
    async fn get_port_group_info(&self, name: &PortGroupName) -> NbResult<PortGroupInfo> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("get_port_group_info({})", name));
        if let Some(err) = state.take_failure("get_port_group_info", NbOpKind::Read) {
            return Err(err);
        }

        Ok(state
            .port_groups
            .get(name)
            .map(|pg| PortGroupInfo {
                uuid: pg.uuid.clone(),
                has_acls: !pg.rules.is_empty(),
            })
            .unwrap_or_default())
    }

    async fn create_port_group(
        &self,
        project_id: i64,
        name: &PortGroupName,
        parent: Option<&PortGroupName>,
        switch: Option<&SwitchName>,
        router_port: Option<&SwitchPortName>,
    ) -> NbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("create_port_group({})", name));
        if let Some(err) = state.take_failure("create_port_group", NbOpKind::Write) {
            return Err(err);
        }

        if state.port_groups.contains_key(name) {
            return Err(NbError::exists(name.as_str()));
        }

        state.next_uuid += 1;
        let uuid = PortGroupUuid::new(format!("pg-uuid-{:04}", state.next_uuid));

        let mut members = Vec::new();
        if switch.is_some() {
            let port = router_port.ok_or_else(|| {
                NbError::api_write("create_port_group", "switch link requires a router port")
            })?;
            members.push(port.clone());
        }

        state.port_groups.insert(
            name.clone(),
            MockPortGroup {
                uuid,
                project_id,
                parent: parent.cloned(),
                switch: switch.cloned(),
                members,
                rules: Vec::new(),
                port_rules: BTreeMap::new(),
            },
        );

        Ok(())
    }

    async fn delete_port_group(&self, names: &[PortGroupName]) -> NbResult<()> {
        let mut state = self.state.lock().unwrap();
        let joined = names
            .iter()
            .map(PortGroupName::as_str)
            .collect::<Vec<_>>()
            .join(",");
        state.record(format!("delete_port_group({})", joined));
        if let Some(err) = state.take_failure("delete_port_group", NbOpKind::Write) {
            return Err(err);
        }

        for name in names {
            state.port_groups.remove(name);
        }

        Ok(())
    }

    async fn list_port_groups_by_project(&self, project_id: i64) -> NbResult<Vec<PortGroupName>> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("list_port_groups_by_project({})", project_id));
        if let Some(err) = state.take_failure("list_port_groups_by_project", NbOpKind::Read) {
            return Err(err);
        }

        Ok(state
            .port_groups
            .iter()
            .filter(|(_, pg)| pg.project_id == project_id)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn update_port_group_acl_rules(
        &self,
        port_group: &PortGroupName,
        match_substitutions: Option<&HashMap<String, String>>,
        rules: &[OvnAclRule],
    ) -> NbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("update_port_group_acl_rules({})", port_group));
        if let Some(err) = state.take_failure("update_port_group_acl_rules", NbOpKind::Write) {
            return Err(err);
        }

        let pg = state
            .port_groups
            .get_mut(port_group)
            .ok_or_else(|| NbError::not_found(port_group.as_str()))?;

        pg.rules = rules
            .iter()
            .map(|r| substitute(r, match_substitutions))
            .collect();

        Ok(())
    }

    async fn update_port_group_port_acl_rules(
        &self,
        port_group: &PortGroupName,
        port: &SwitchPortName,
        rules: &[OvnAclRule],
    ) -> NbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!(
            "update_port_group_port_acl_rules({}, {})",
            port_group, port
        ));
        if let Some(err) = state.take_failure("update_port_group_port_acl_rules", NbOpKind::Write) {
            return Err(err);
        }

        let pg = state
            .port_groups
            .get_mut(port_group)
            .ok_or_else(|| NbError::not_found(port_group.as_str()))?;

        pg.port_rules.insert(port.clone(), rules.to_vec());

        Ok(())
    }

    async fn update_logical_switch_acl_rules(
        &self,
        switch: &SwitchName,
        rules: &[OvnAclRule],
    ) -> NbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record(format!("update_logical_switch_acl_rules({})", switch));
        if let Some(err) = state.take_failure("update_logical_switch_acl_rules", NbOpKind::Write) {
            return Err(err);
        }

        state.switch_rules.insert(switch.clone(), rules.to_vec());

        Ok(())
    }
}
