//! Baseline switch-level rules for network services.
//!
//! Every OVN network gets a fixed allow program on its internal switch so
//! that core services (ARP/ND, DHCP, router pings, DNS) keep working
//! underneath the user's ACLs. Emission is all-or-nothing: the full program
//! replaces the switch's rule set in one call.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tokio_util::sync::CancellationToken;

use ovn_nb::{NbClient, OvnAclAction, OvnAclRule, SwitchName, SwitchPortName, TCP_ACK, TCP_RST};

use crate::error::AclResult;
use crate::reconcile::check_cancel;
use crate::types::PRIORITY_SWITCH_ALLOW;

fn allow(match_: String) -> OvnAclRule {
    OvnAclRule::new(OvnAclAction::Allow, PRIORITY_SWITCH_ALLOW, match_)
}

/// Replaces the switch-level ACL rule set of a network's internal switch
/// with the baseline allow program.
///
/// `int_router_ips` are the router's addresses on the internal switch (ping
/// to/from each is allowed); `dns_ips` get udp/53 and tcp/53 towards the
/// router port.
pub async fn apply_network_baseline<N: NbClient + ?Sized>(
    client: &N,
    switch: &SwitchName,
    router_port: &SwitchPortName,
    int_router_ips: &[IpNetwork],
    dns_ips: &[IpAddr],
    cancel: &CancellationToken,
) -> AclResult<()> {
    let mut rules = vec![
        // Neighbour discovery.
        allow("(arp || nd)".to_string()),
        // IPv6 router adverts from the router.
        allow(format!("inport == \"{}\" && nd_ra", router_port)),
        // IPv6 router solicitation to the router.
        allow(format!("outport == \"{}\" && nd_rs", router_port)),
        // IPv6 ICMP Multicast Listener Discovery reports.
        allow("icmp6 && icmp6.type == 143 && ip.ttl == 1 && ip6.dst == ff02::16".to_string()),
        // IPv4 IGMP.
        allow("igmp && ip.ttl == 1 && ip4.mcast".to_string()),
        // DHCP to the router.
        allow(format!(
            "outport == \"{}\" && ((ip4 && udp.dst == 67) || (ip6 && udp.dst == 547))",
            router_port
        )),
        // These 3 rules allow packets sent by the ACL when matching a reject
        // rule. It is very important that they are allowed when no stateful
        // rules are in use, otherwise a bug in OVN causes it to enter an
        // infinite loop rejecting its own generated reject packets, causing
        // more to be generated, and OVN will use 100% CPU.
        allow("icmp6 && icmp6.type == {1,2,3,4} && ip.ttl == 255".to_string()),
        allow("icmp4 && icmp4.type == {3,11,12} && ip.ttl == 255".to_string()),
        allow(format!("tcp && tcp.flags == {:#05x}", TCP_RST | TCP_ACK)),
    ];

    // Ping to/from each internal router IP.
    for router_ip in int_router_ips {
        let (ip_version, ping_type, ping_reply_type) = match router_ip {
            IpNetwork::V4(_) => (4, 8, 0),
            IpNetwork::V6(_) => (6, 128, 129),
        };

        rules.push(allow(format!(
            "outport == \"{rp}\" && icmp{v}.type == {t} && ip{v}.dst == {ip}",
            rp = router_port,
            v = ip_version,
            t = ping_type,
            ip = router_ip.ip(),
        )));
        rules.push(allow(format!(
            "inport == \"{rp}\" && icmp{v}.type == {t} && ip{v}.src == {ip}",
            rp = router_port,
            v = ip_version,
            t = ping_reply_type,
            ip = router_ip.ip(),
        )));
    }

    // DNS towards each DNS server.
    for dns_ip in dns_ips {
        let ip_version = if dns_ip.is_ipv4() { 4 } else { 6 };

        rules.push(allow(format!(
            "outport == \"{rp}\" && ip{v}.dst == {ip} && (udp.dst == 53 || tcp.dst == 53)",
            rp = router_port,
            v = ip_version,
            ip = dns_ip,
        )));
    }

    check_cancel(cancel)?;
    client.update_logical_switch_acl_rules(switch, &rules).await?;

    Ok(())
}
