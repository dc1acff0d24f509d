//! End-to-end tests for the ACL engine over the in-memory catalog and the
//! mock Northbound client.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use acl_engine::catalog::{AclUsage, MemoryCatalog};
use acl_engine::naming;
use acl_engine::reaper::{delete_unused_port_groups, IgnoreUsage};
use acl_engine::reconcile::{NetworkUsage, Reconciler};
use acl_engine::types::{AclAction, AclRecord, AclRule, RuleProtocol};
use acl_engine::AclError;
use ovn_nb::{MockNbClient, NbClient, OvnAclAction, PortGroupName};

struct Env {
    catalog: Arc<MemoryCatalog>,
    client: Arc<MockNbClient>,
    reconciler: Reconciler<MemoryCatalog, MockNbClient>,
    cancel: CancellationToken,
}

impl Env {
    fn new() -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add_project("default", 1);

        let client = Arc::new(MockNbClient::new());
        let reconciler = Reconciler::new(Arc::clone(&catalog), Arc::clone(&client));

        Self {
            catalog,
            client,
            reconciler,
            cancel: CancellationToken::new(),
        }
    }

    fn add_acl(&self, name: &str, id: i64, ingress: Vec<AclRule>, egress: Vec<AclRule>) {
        self.catalog.add_acl(AclRecord {
            id,
            project: "default".to_string(),
            name: name.to_string(),
            ingress,
            egress,
            ..Default::default()
        });
    }

    async fn ensure(
        &self,
        acl_names: &[&str],
        nets: &[NetworkUsage],
        reapply: bool,
    ) -> Result<acl_engine::AclCleanup, AclError> {
        let names: Vec<String> = acl_names.iter().map(|s| s.to_string()).collect();
        self.reconciler
            .ensure_acls("default", &names, nets, reapply, &self.cancel)
            .await
    }

    fn rules_of(&self, port_group: &PortGroupName) -> Vec<ovn_nb::OvnAclRule> {
        self.client
            .port_group(port_group)
            .map(|pg| pg.rules)
            .unwrap_or_default()
    }
}

fn allow_tcp_80() -> AclRule {
    AclRule {
        protocol: Some(RuleProtocol::Tcp),
        destination_port: "80".to_string(),
        ..AclRule::new(AclAction::Allow)
    }
}

// ============ ensure_acls: creation ============

#[tokio::test]
async fn test_ensure_creates_port_group_with_rules() {
    let env = Env::new();
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    let cleanup = env.ensure(&["web"], &[], false).await.unwrap();
    assert_eq!(
        cleanup.created_port_groups(),
        &[naming::acl_port_group_name(7)]
    );

    let rules = env.rules_of(&naming::acl_port_group_name(7));
    assert_eq!(rules.len(), 2);
    assert_eq!(
        rules[0].match_,
        "(outport == @incus_acl7) && (tcp) && (tcp.dst == 80)"
    );
    assert_eq!(rules[0].action, OvnAclAction::AllowRelated);
    assert_eq!(rules[0].priority, 300);

    // The unique priority-0 rule is the catch-all drop.
    let catch_all = &rules[1];
    assert_eq!(catch_all.priority, 0);
    assert_eq!(catch_all.action, OvnAclAction::Drop);
    assert_eq!(
        catch_all.match_,
        "(inport == @incus_acl7 || outport == @incus_acl7)"
    );
    assert!(!catch_all.log);
}

#[tokio::test]
async fn test_ensure_unknown_acl_fails() {
    let env = Env::new();
    let err = env.ensure(&["ghost"], &[], false).await.unwrap_err();
    assert!(matches!(err, AclError::NotFound { .. }));
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_referenced_acl_gets_placeholder_first() {
    let env = Env::new();
    env.add_acl("db", 1, vec![], vec![]);

    let mut to_db = AclRule::new(AclAction::Allow);
    to_db.destination = "db".to_string();
    env.add_acl("web", 2, vec![], vec![to_db]);

    env.ensure(&["web"], &[], false).await.unwrap();

    // The placeholder for "db" exists, empty, and was created before "web"'s
    // own group so the rule reference resolves on first apply.
    assert!(env.rules_of(&naming::acl_port_group_name(1)).is_empty());
    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(1))
        .is_some());

    let calls = env.client.calls();
    let create_db = calls
        .iter()
        .position(|c| c == "create_port_group(incus_acl1)")
        .unwrap();
    let create_web = calls
        .iter()
        .position(|c| c == "create_port_group(incus_acl2)")
        .unwrap();
    assert!(create_db < create_web);

    let web_rules = env.rules_of(&naming::acl_port_group_name(2));
    assert_eq!(
        web_rules[0].match_,
        "(inport == @incus_acl2) && (outport == @incus_acl1)"
    );
}

#[tokio::test]
async fn test_ensure_creates_per_network_groups() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    env.ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    let net_pg = env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 3))
        .unwrap();
    assert_eq!(net_pg.parent, Some(naming::acl_port_group_name(7)));
    assert_eq!(net_pg.switch, Some(naming::int_switch_name(3)));
    assert_eq!(net_pg.members, vec![naming::int_switch_router_port_name(3)]);
}

// ============ ensure_acls: network specialization ============

#[tokio::test]
async fn test_internal_subject_is_specialized_per_network() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");

    let mut from_internal = AclRule::new(AclAction::Allow);
    from_internal.source = "@internal".to_string();
    env.add_acl("web", 7, vec![from_internal], vec![]);

    env.ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    // The network specific rule lands on the per-network group with the
    // pseudo selector substituted; the primary group only keeps the
    // catch-all.
    let primary = env.rules_of(&naming::acl_port_group_name(7));
    assert_eq!(primary.len(), 1);
    assert_eq!(primary[0].priority, 0);

    let specialized = env.rules_of(&naming::acl_network_port_group_name(7, 3));
    assert_eq!(specialized.len(), 1);
    assert_eq!(
        specialized[0].match_,
        "(outport == @incus_acl7) && (inport == @incus_net3)"
    );
}

#[tokio::test]
async fn test_external_subject_substitutes_quoted_router_port() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");

    let mut to_external = AclRule::new(AclAction::Allow);
    to_external.destination = "@external".to_string();
    env.add_acl("web", 7, vec![], vec![to_external]);

    env.ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    let specialized = env.rules_of(&naming::acl_network_port_group_name(7, 3));
    assert_eq!(
        specialized[0].match_,
        "(inport == @incus_acl7) && (outport == \"incus-net3-ls-int-lsp-router\")"
    );
}

// ============ ensure_acls: peers ============

#[tokio::test]
async fn test_peer_rule_applies_to_owning_network() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "mynet", "ovn");
    env.catalog.add_peer(3, "mypeer", Some(12));

    let mut to_peer = AclRule::new(AclAction::Allow);
    to_peer.destination = "@mynet/mypeer".to_string();
    env.add_acl("web", 7, vec![], vec![to_peer]);

    env.ensure(&["web"], &[NetworkUsage::new(3, "mynet")], false)
        .await
        .unwrap();

    let rules = env.rules_of(&naming::acl_port_group_name(7));
    assert_eq!(
        rules[0].match_,
        "(inport == @incus_acl7) && (ip6.dst == $incus_net12_routes_ip6 || ip4.dst == $incus_net12_routes_ip4)"
    );
}

#[tokio::test]
async fn test_peer_rule_rejected_on_non_owning_network() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "mynet", "ovn");
    env.catalog.add_network("default", 4, "othernet", "ovn");
    env.catalog.add_peer(3, "mypeer", Some(12));

    let mut to_peer = AclRule::new(AclAction::Allow);
    to_peer.destination = "@mynet/mypeer".to_string();
    env.add_acl("web", 7, vec![], vec![to_peer]);

    let before = env.client.snapshot();
    let err = env
        .ensure(&["web"], &[NetworkUsage::new(4, "othernet")], false)
        .await
        .unwrap_err();

    assert!(matches!(err, AclError::PeerMissing { .. }));
    assert!(err.to_string().contains("mynet/mypeer"));
    assert!(err.to_string().contains("othernet"));

    // Everything created on the way was rolled back.
    assert_eq!(env.client.snapshot(), before);
}

#[tokio::test]
async fn test_unestablished_peer_is_not_resolvable() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "mynet", "ovn");
    // Peer exists but has no target network yet.
    env.catalog.add_peer(3, "mypeer", None);

    let mut to_peer = AclRule::new(AclAction::Allow);
    to_peer.destination = "@mynet/mypeer".to_string();
    env.add_acl("web", 7, vec![], vec![to_peer]);

    let err = env
        .ensure(&["web"], &[NetworkUsage::new(3, "mynet")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, AclError::ReferenceNotFound { .. }));
}

// ============ ensure_acls: idempotence & repair ============

#[tokio::test]
async fn test_ensure_twice_makes_no_second_mutation() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    let nets = [NetworkUsage::new(3, "ovnnet")];
    env.ensure(&["web"], &nets, false).await.unwrap();
    let state_after_first = env.client.snapshot();

    env.client.clear_calls();
    let cleanup = env.ensure(&["web"], &nets, false).await.unwrap();

    assert!(cleanup.is_empty());
    assert_eq!(env.client.mutation_count(), 0);
    assert_eq!(env.client.snapshot(), state_after_first);
}

#[tokio::test]
async fn test_partially_set_up_group_gets_rules_applied() {
    let env = Env::new();
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    // Group exists but carries no rules: only partially set up, as even a
    // ruleless ACL gets the default catch-all.
    let pg = naming::acl_port_group_name(7);
    env.client
        .create_port_group(1, &pg, None, None, None)
        .await
        .unwrap();

    env.ensure(&["web"], &[], false).await.unwrap();
    assert_eq!(env.rules_of(&pg).len(), 2);
}

#[tokio::test]
async fn test_reapply_refreshes_existing_rules() {
    let env = Env::new();
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);
    env.ensure(&["web"], &[], false).await.unwrap();

    // Ruleset changes in the catalog.
    let mut udp = AclRule::new(AclAction::Allow);
    udp.protocol = Some(RuleProtocol::Udp);
    udp.destination_port = "53".to_string();
    env.add_acl("web", 7, vec![udp], vec![]);

    // Without reapply nothing changes.
    env.ensure(&["web"], &[], false).await.unwrap();
    assert!(env.rules_of(&naming::acl_port_group_name(7))[0]
        .match_
        .contains("tcp.dst == 80"));

    // With reapply the new ruleset lands.
    env.ensure(&["web"], &[], true).await.unwrap();
    assert!(env.rules_of(&naming::acl_port_group_name(7))[0]
        .match_
        .contains("udp.dst == 53"));
}

#[tokio::test]
async fn test_binding_new_network_creates_missing_specialization() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    env.ensure(&["web"], &[], false).await.unwrap();
    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 3))
        .is_none());

    // Binding to the network later creates the per-network group lazily.
    env.ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();
    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 3))
        .is_some());
}

// ============ ensure_acls: rollback & cancellation ============

#[tokio::test]
async fn test_rule_apply_failure_rolls_back_all_creations() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("db", 1, vec![], vec![]);

    let mut to_db = AclRule::new(AclAction::Allow);
    to_db.destination = "db".to_string();
    env.add_acl("web", 2, vec![], vec![to_db]);

    let before = env.client.snapshot();
    env.client.fail_next("update_port_group_acl_rules");

    let err = env
        .ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, AclError::Ovn { .. }));

    // Placeholder, primary and per-network groups were all reverted.
    assert_eq!(env.client.snapshot(), before);
}

#[tokio::test]
async fn test_create_failure_rolls_back_earlier_creations() {
    let env = Env::new();
    env.add_acl("db", 1, vec![], vec![]);

    let mut to_db = AclRule::new(AclAction::Allow);
    to_db.destination = "db".to_string();
    env.add_acl("web", 2, vec![], vec![to_db]);

    let before = env.client.snapshot();

    // The "db" placeholder create succeeds, the primary create fails.
    env.client.fail_after("create_port_group", 1);
    let err = env.ensure(&["web"], &[], false).await.unwrap_err();
    assert!(matches!(err, AclError::Ovn { .. }));
    assert_eq!(env.client.snapshot(), before);
}

#[tokio::test]
async fn test_cancelled_token_aborts_without_mutations() {
    let env = Env::new();
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    let before = env.client.snapshot();
    env.cancel.cancel();

    let err = env.ensure(&["web"], &[], false).await.unwrap_err();
    assert!(matches!(err, AclError::Cancelled));
    assert_eq!(env.client.snapshot(), before);
    assert_eq!(env.client.mutation_count(), 0);
}

#[tokio::test]
async fn test_caller_owned_cleanup_reverts_success() {
    let env = Env::new();
    env.add_acl("web", 7, vec![allow_tcp_80()], vec![]);

    let before = env.client.snapshot();
    let cleanup = env.ensure(&["web"], &[], false).await.unwrap();
    assert!(!cleanup.is_empty());

    // A later step of the caller's transaction failed; unwind ours too.
    cleanup.revert(env.client.as_ref()).await;
    assert_eq!(env.client.snapshot(), before);
}

// ============ reaper ============

fn network_usage(name: &str) -> AclUsage {
    AclUsage::Network {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn test_reaper_with_ignored_network_usage() {
    let env = Env::new();
    env.catalog.add_network("default", 10, "neta", "ovn");
    env.catalog.add_network("default", 11, "netb", "ovn");
    env.add_acl("x", 7, vec![], vec![]);

    // Both networks reference ACL "x".
    env.catalog
        .add_usage("default", &["x"], network_usage("neta"), None, None);
    env.catalog
        .add_usage("default", &["x"], network_usage("netb"), None, None);

    env.ensure(
        &["x"],
        &[NetworkUsage::new(10, "neta"), NetworkUsage::new(11, "netb")],
        false,
    )
    .await
    .unwrap();

    // Pretend network A's usage is already gone.
    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        Some(&IgnoreUsage::Network {
            name: "neta".to_string(),
        }),
        &[],
        &env.cancel,
    )
    .await
    .unwrap();

    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 10))
        .is_none());
    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 11))
        .is_some());
    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(7))
        .is_some());
}

#[tokio::test]
async fn test_reaper_keeps_nic_used_acls() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("x", 7, vec![], vec![]);
    env.ensure(&["x"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    let nic_config = BTreeMap::from([("network".to_string(), "ovnnet".to_string())]);
    env.catalog.add_usage(
        "default",
        &["x"],
        AclUsage::Instance {
            name: "c1".to_string(),
            project: "default".to_string(),
        },
        Some("eth0"),
        Some(nic_config),
    );

    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        None,
        &[],
        &env.cancel,
    )
    .await
    .unwrap();

    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(7))
        .is_some());
    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 3))
        .is_some());
}

#[tokio::test]
async fn test_reaper_ignoring_the_only_nic_usage_deletes() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("x", 7, vec![], vec![]);
    env.ensure(&["x"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    let nic_config = BTreeMap::from([("network".to_string(), "ovnnet".to_string())]);
    env.catalog.add_usage(
        "default",
        &["x"],
        AclUsage::Instance {
            name: "c1".to_string(),
            project: "default".to_string(),
        },
        Some("eth0"),
        Some(nic_config),
    );

    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        Some(&IgnoreUsage::InstanceNic {
            instance: "c1".to_string(),
            project: "default".to_string(),
            nic_name: "eth0".to_string(),
        }),
        &[],
        &env.cancel,
    )
    .await
    .unwrap();

    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(7))
        .is_none());
    assert!(env
        .client
        .port_group(&naming::acl_network_port_group_name(7, 3))
        .is_none());
}

#[tokio::test]
async fn test_reaper_keeps_acl_referenced_by_used_acl() {
    let env = Env::new();
    env.catalog.add_network("default", 3, "ovnnet", "ovn");
    env.add_acl("db", 1, vec![], vec![]);

    let mut to_db = AclRule::new(AclAction::Allow);
    to_db.destination = "db".to_string();
    env.add_acl("web", 2, vec![], vec![to_db]);

    env.ensure(&["web"], &[NetworkUsage::new(3, "ovnnet")], false)
        .await
        .unwrap();

    // "web" is used by the network; "db" only through "web"'s ruleset.
    env.catalog
        .add_usage("default", &["web"], network_usage("ovnnet"), None, None);

    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        None,
        &[],
        &env.cancel,
    )
    .await
    .unwrap();

    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(1))
        .is_some());
    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(2))
        .is_some());
}

#[tokio::test]
async fn test_reaper_is_idempotent() {
    let env = Env::new();
    env.add_acl("x", 7, vec![], vec![]);
    env.ensure(&["x"], &[], false).await.unwrap();

    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        None,
        &[],
        &env.cancel,
    )
    .await
    .unwrap();
    assert!(env
        .client
        .port_group(&naming::acl_port_group_name(7))
        .is_none());

    // A second sweep has nothing left to delete.
    env.client.clear_calls();
    delete_unused_port_groups(
        env.catalog.as_ref(),
        env.client.as_ref(),
        "default",
        None,
        &[],
        &env.cancel,
    )
    .await
    .unwrap();
    assert_eq!(env.client.mutation_count(), 0);
}
