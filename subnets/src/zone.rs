// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Subnet relations inside one zone cluster.
//!
//! Networks are indexed under the address they actually show inside the
//! cluster: when one of a network's tags is active in its own zone's
//! domain, the translated prefix is used. Duplicate addresses are errors,
//! direct containment sets the `up` pointer, and the address-overlap check
//! ensures interfaces and hosts stay clear of declared subnets. Afterwards
//! each network learns its largest enclosing real network usable for
//! routing, and subnets are dropped from their zone's network list.

use crate::nat_label;
use diag::Diagnostics;
use lpm::{Prefix, PrefixTable};
use std::collections::{BTreeMap, BTreeSet};
use topology::{HostAddr, NatKind, NatSet, NetworkId, TagId, Topology, ZoneId};

pub fn find_subnets_in_zone(topo: &mut Topology, diag: &mut Diagnostics) {
    diag.progress("Finding subnets in zones");
    let mut done: BTreeSet<ZoneId> = BTreeSet::new();
    for zone in topo.zones.keys().collect::<Vec<_>>() {
        if !done.insert(zone) {
            continue;
        }
        let mut cluster = topo.zones[zone].cluster.clone();
        if cluster.is_empty() {
            cluster.push(zone);
        }
        done.extend(cluster.iter().copied());
        find_subnets_in_cluster(topo, &cluster, diag);
    }
}

/// The address a network shows inside its own zone, with the active tag if
/// one applies.
fn effective_address(
    topo: &Topology,
    net: NetworkId,
    nat_set: &NatSet,
) -> (Prefix, Option<TagId>) {
    for (&tag, def) in &topo.networks[net].nat {
        if nat_set.contains(tag) {
            if def.kind == NatKind::Identity {
                return (topo.networks[net].prefix, None);
            }
            return (def.prefix, Some(tag));
        }
    }
    (topo.networks[net].prefix, None)
}

fn find_subnets_in_cluster(topo: &mut Topology, cluster: &[ZoneId], diag: &mut Diagnostics) {
    let mut table: PrefixTable<NetworkId> = PrefixTable::new();
    let mut effective: BTreeMap<NetworkId, (Prefix, Option<TagId>)> = BTreeMap::new();
    let mut members: Vec<NetworkId> = Vec::new();
    for &zone in cluster {
        let nat_set = topo.zones[zone]
            .nat_domain
            .map(|domain| topo.domains[domain].nat_set.clone())
            .unwrap_or_default();
        let in_zone: Vec<NetworkId> = topo.zones[zone]
            .networks
            .iter()
            .copied()
            .chain(topo.zones[zone].aggregates.values().copied())
            .collect();
        for net in in_zone {
            if topo.networks[net].unnumbered || topo.networks[net].tunnel {
                continue;
            }
            let (prefix, tag) = effective_address(topo, net, &nat_set);
            effective.insert(net, (prefix, tag));
            if !topo.networks[net].is_aggregate {
                members.push(net);
            }
            if let Some(&other) = table.insert(&prefix, net) {
                diag.error(format!(
                    "{} and {} have identical address in {}",
                    topo.networks[net].name,
                    topo.networks[other].name,
                    topo.zones[zone].name
                ));
            }
        }
    }

    // Direct containment between effective addresses.
    let mut pairs: Vec<(NetworkId, NetworkId)> = Vec::new();
    table.subnet_relation(|&sub, &big| pairs.push((sub, big)));
    for &(sub, big) in &pairs {
        topo.networks[sub].up = Some(big);
        if topo.networks[sub].is_aggregate {
            let nested = topo.networks[sub].sub_networks.clone();
            topo.networks[big].sub_networks.extend(nested);
        } else {
            topo.networks[big].sub_networks.push(sub);
        }
        let (sub_prefix, sub_tag) = effective[&sub];
        check_subnets(topo, big, sub, sub_prefix, sub_tag, None, diag);
    }

    // For each network the largest enclosing non-aggregate network, used to
    // drop subnets from the zone lists and to derive max_routing_net.
    let mut max_up: BTreeMap<NetworkId, NetworkId> = BTreeMap::new();
    for &net in &members {
        set_max_net(topo, Some(net), &mut max_up);
    }

    for &net in &members {
        if !max_up.contains_key(&net) {
            continue;
        }
        let mut max_routing: Option<NetworkId> = None;
        let mut up = topo.networks[net].up;
        'up: while let Some(upper) = up {
            // A supernet hidden somewhere may only route for the network if
            // the network is hidden there as well.
            for (tag, upper_def) in &topo.networks[upper].nat {
                if !upper_def.kind.is_hidden() {
                    continue;
                }
                let Some(own_def) = topo.networks[net].nat.get(tag) else {
                    break 'up;
                };
                if !own_def.kind.is_hidden() {
                    break 'up;
                }
            }
            if !topo.networks[upper].is_aggregate {
                max_routing = Some(upper);
            }
            up = topo.networks[upper].up;
        }
        topo.networks[net].max_routing_net = max_routing;
    }

    // Subnets of real networks no longer count as toplevel networks of
    // their zone. Aggregates stay, even without matching networks.
    for &zone in cluster {
        let kept: Vec<NetworkId> = topo.zones[zone]
            .networks
            .iter()
            .copied()
            .filter(|net| !max_up.contains_key(net))
            .collect();
        topo.zones[zone].networks = kept;
    }
}

fn set_max_net(
    topo: &Topology,
    net: Option<NetworkId>,
    max_up: &mut BTreeMap<NetworkId, NetworkId>,
) -> Option<NetworkId> {
    let net = net?;
    if let Some(&max) = max_up.get(&net) {
        return Some(max);
    }
    if let Some(max) = set_max_net(topo, topo.networks[net].up, max_up) {
        if !topo.networks[net].is_aggregate {
            max_up.insert(net, max);
        }
        return Some(max);
    }
    if topo.networks[net].is_aggregate {
        return None;
    }
    Some(net)
}

/// All interfaces and hosts of `big` must stay outside the address range of
/// the declared subnet. The single exception is NAT to an interface address
/// (masquerading): the interface owns the subnet's single address and binds
/// the subnet's tag itself.
pub(crate) fn check_subnets(
    topo: &Topology,
    big: NetworkId,
    sub: NetworkId,
    sub_prefix: Prefix,
    sub_tag: Option<TagId>,
    context: Option<&str>,
    diag: &mut Diagnostics,
) {
    if topo.networks[big].is_aggregate || topo.networks[sub].is_aggregate {
        return;
    }
    let label = nat_label(topo, sub, sub_tag);
    let in_context = context.map(|c| format!(" in {c}")).unwrap_or_default();
    for &iface in &topo.networks[big].interfaces {
        let Some(ip) = topo.interfaces[iface].addr.ip() else {
            continue;
        };
        if !sub_prefix.covers_addr(&ip) {
            continue;
        }
        if let Some(tag) = sub_tag {
            if sub_prefix.is_host()
                && sub_prefix.address() == ip
                && topo.interfaces[iface].bind_nat.contains(&tag)
            {
                continue;
            }
        }
        diag.warn(format!(
            "IP of interface {} overlaps with subnet {label}{in_context}",
            topo.interfaces[iface].name
        ));
    }
    for &host in &topo.networks[big].hosts {
        let overlaps = match topo.hosts[host].addr {
            HostAddr::Ip(ip) => sub_prefix.covers_addr(&ip),
            HostAddr::Range(lo, hi) => {
                sub_prefix.covers_addr(&lo)
                    || sub_prefix.covers_addr(&hi)
                    || (lo <= sub_prefix.address() && sub_prefix.address() <= hi)
            }
        };
        if overlaps {
            diag.warn(format!(
                "IP of host {} overlaps with subnet {label}{in_context}",
                topo.hosts[host].name
            ));
        }
    }
}
