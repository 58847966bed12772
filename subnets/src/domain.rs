// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Subnet relations across NAT domains.
//!
//! Per NAT partition (domains connected through shared routers), the
//! universe of every network plus each of its non-hidden translations is
//! built once; raw containment and identical-address groups are computed on
//! it, then intersected with per-domain visibility: a translation is
//! visible where its tag is active, the untranslated network where none of
//! its tags is. From the per-domain relations follow `has_other_subnet`,
//! the identical-address checks with their known-safe exceptions, the
//! `subnet_of` advisories, the per-domain stability of same-zone relations
//! (`unstable_nat`) and finally `max_secondary_net`.

use crate::nat_label;
use crate::zone::check_subnets;
use diag::{Diagnostics, Options};
use lpm::{Prefix, PrefixTable};
use std::collections::{BTreeMap, BTreeSet};
use topology::{DomainId, NatKind, NetworkId, TagId, Topology};

pub fn find_subnets_in_nat_domain(
    topo: &mut Topology,
    options: &Options,
    diag: &mut Diagnostics,
) {
    diag.progress(&format!(
        "Finding subnets in {} NAT domains",
        topo.domains.len()
    ));
    let partitions = find_nat_partitions(topo);
    let mut part_domains: BTreeMap<u32, Vec<DomainId>> = BTreeMap::new();
    for domain in topo.domains.keys() {
        part_domains
            .entry(partitions[&domain])
            .or_default()
            .push(domain);
    }
    let mut part_networks: BTreeMap<u32, Vec<NetworkId>> = BTreeMap::new();
    for net in topo.networks.keys() {
        if topo.networks[net].unnumbered || topo.networks[net].tunnel {
            continue;
        }
        let Some(domain) = topo.domain_of(net) else {
            continue;
        };
        part_networks
            .entry(partitions[&domain])
            .or_default()
            .push(net);
    }
    let mut subnet_of_used: BTreeSet<(NetworkId, Option<TagId>)> = BTreeSet::new();
    for (part, domains) in &part_domains {
        let networks = part_networks.get(part).cloned().unwrap_or_default();
        find_subnets_in_partition(topo, domains, &networks, options, &mut subnet_of_used, diag);
    }
    warn_useless_subnet_of(topo, options, &subnet_of_used, diag);
}

/// Domains belong to one partition when they are connected through shared
/// routers; separated parts of the topology analyze their addresses
/// independently.
fn find_nat_partitions(topo: &Topology) -> BTreeMap<DomainId, u32> {
    let mut partitions: BTreeMap<DomainId, u32> = BTreeMap::new();
    let mut mark = 0u32;
    for seed in topo.domains.keys() {
        if partitions.contains_key(&seed) {
            continue;
        }
        mark += 1;
        let mut stack = vec![seed];
        while let Some(domain) = stack.pop() {
            if partitions.contains_key(&domain) {
                continue;
            }
            partitions.insert(domain, mark);
            for &router in &topo.domains[domain].routers {
                for &next in &topo.routers[router].nat_domains {
                    if !partitions.contains_key(&next) {
                        stack.push(next);
                    }
                }
            }
        }
    }
    partitions
}

/// One member of the address universe: a network itself or one of its
/// non-hidden translations.
struct Entry {
    orig: NetworkId,
    tag: Option<TagId>,
    prefix: Prefix,
    dynamic: bool,
    subnet_of: Option<NetworkId>,
    /// `subnet_of` came from the configuration, not from report
    /// suppression.
    authored: bool,
}

#[allow(clippy::too_many_lines)]
fn find_subnets_in_partition(
    topo: &mut Topology,
    domains: &[DomainId],
    networks: &[NetworkId],
    options: &Options,
    subnet_of_used: &mut BTreeSet<(NetworkId, Option<TagId>)>,
    diag: &mut Diagnostics,
) {
    // The universe, in deterministic order.
    let mut entries: Vec<Entry> = Vec::new();
    let mut orig_entry: BTreeMap<NetworkId, usize> = BTreeMap::new();
    for &net in networks {
        orig_entry.insert(net, entries.len());
        entries.push(Entry {
            orig: net,
            tag: None,
            prefix: topo.networks[net].prefix,
            dynamic: false,
            subnet_of: topo.networks[net].subnet_of,
            authored: topo.networks[net].subnet_of.is_some(),
        });
        for (&tag, def) in &topo.networks[net].nat {
            if def.kind.is_hidden() {
                continue;
            }
            entries.push(Entry {
                orig: net,
                tag: Some(tag),
                prefix: def.prefix,
                dynamic: def.kind == NatKind::Dynamic,
                subnet_of: def.subnet_of,
                authored: def.subnet_of.is_some(),
            });
        }
    }

    // Identical addresses and raw containment over the whole universe.
    let mut table: PrefixTable<usize> = PrefixTable::new();
    let mut identical: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..entries.len() {
        if let Some(&rep) = table.insert(&entries[idx].prefix, idx) {
            identical.entry(rep).or_insert_with(|| vec![rep]).push(idx);
        }
    }
    let mut is_in: BTreeMap<usize, usize> = BTreeMap::new();
    table.subnet_relation(|&sub, &big| {
        is_in.insert(sub, big);
    });

    // Same-zone relations pending upward propagation of has_other_subnet.
    let mut pending: BTreeMap<NetworkId, Vec<NetworkId>> = BTreeMap::new();
    // Same-zone subnet relations per domain, for the stability check.
    let mut subnet_in_zone: BTreeMap<NetworkId, BTreeMap<NetworkId, BTreeSet<DomainId>>> =
        BTreeMap::new();
    let mut ident_seen: BTreeSet<usize> = BTreeSet::new();
    let mut relation_seen: BTreeSet<(usize, usize)> = BTreeSet::new();

    for &domain in domains {
        // A single empty zone surrounded by unmanaged devices cannot
        // observe an address conflict.
        let domain_zones = topo.domains[domain].zones.clone();
        if let [zone] = domain_zones[..] {
            if topo.zones[zone].networks.is_empty()
                && !topo.zones[zone]
                    .interfaces
                    .iter()
                    .any(|&iface| topo.routers[topo.interfaces[iface].router].managed)
            {
                continue;
            }
        }
        let domain_name = topo.domains[domain].name.clone();
        let nat_set = topo.domains[domain].nat_set.clone();

        // Visibility in this domain.
        let visible: Vec<bool> = entries
            .iter()
            .map(|entry| match entry.tag {
                Some(tag) => nat_set.contains(tag),
                None => !topo.networks[entry.orig]
                    .nat
                    .keys()
                    .any(|&tag| nat_set.contains(tag)),
            })
            .collect();

        // Identical addresses visible together in this domain.
        let mut has_identical: BTreeSet<usize> = BTreeSet::new();
        for (&rep, list) in &identical {
            let filtered: Vec<usize> = list.iter().copied().filter(|&e| visible[e]).collect();
            has_identical.extend(filtered.iter().copied());
            if filtered.is_empty() {
                continue;
            }
            // Fully analyzed lists need no second look in later domains.
            if ident_seen.contains(&rep) {
                continue;
            }
            if filtered.len() == list.len() {
                ident_seen.insert(rep);
            }
            let nat_other = filtered[0];
            let other = entries[nat_other].orig;
            for &nat_network in &filtered[1..] {
                let net = entries[nat_network].orig;
                let mut error = false;
                if topo.networks[other].is_aggregate || topo.networks[net].is_aggregate {
                    // Identical addresses in different zones block supernet
                    // rules and secondary optimization.
                    topo.networks[other].has_other_subnet = true;
                    topo.networks[net].has_other_subnet = true;
                } else if entries[nat_other].dynamic && entries[nat_network].dynamic {
                    // Dynamic NAT of different networks to one address is
                    // valid.
                } else if topo.networks[other].loopback && entries[nat_network].dynamic {
                    error = !nat_to_loopback_ok(topo, other, &entries[nat_network]);
                } else if entries[nat_other].dynamic && topo.networks[net].loopback {
                    error = !nat_to_loopback_ok(topo, net, &entries[nat_other]);
                } else if topo.networks[net].bridged && topo.networks[other].bridged {
                    // Parts of a bridged network share the address.
                } else {
                    error = true;
                }
                if error {
                    diag.error(format!(
                        "{} and {} have identical address in {domain_name}",
                        label(topo, &entries[nat_network]),
                        label(topo, &entries[nat_other]),
                    ));
                }
            }
        }

        // Pairs in subnet relation, with invisible members replaced by a
        // visible twin or the next visible enclosing entry.
        'subnet: for e in 0..entries.len() {
            let Some(&first_up) = is_in.get(&e) else {
                continue;
            };
            let mut nat_subnet = e;
            if !visible[nat_subnet] {
                let Some(twin) = identical
                    .get(&e)
                    .and_then(|list| list.iter().copied().find(|&c| visible[c]))
                else {
                    continue;
                };
                nat_subnet = twin;
            }
            let mut nat_bignet = first_up;
            'bignet: while !visible[nat_bignet] {
                if let Some(twin) = identical
                    .get(&nat_bignet)
                    .and_then(|list| list.iter().copied().find(|&c| visible[c]))
                {
                    nat_bignet = twin;
                    break 'bignet;
                }
                match is_in.get(&nat_bignet) {
                    Some(&up) => nat_bignet = up,
                    None => continue 'subnet,
                }
            }
            let subnet = entries[nat_subnet].orig;

            // Remember same-zone relations per domain; the stability check
            // below needs them.
            let id_subnets: Vec<NetworkId> = match identical.get(&nat_subnet) {
                Some(list) => list
                    .iter()
                    .copied()
                    .filter(|&c| visible[c])
                    .map(|c| entries[c].orig)
                    .collect(),
                None => vec![subnet],
            };
            for sub in id_subnets {
                let zone = topo.networks[sub].zone;
                let mut walk = nat_bignet;
                loop {
                    let bignet = entries[walk].orig;
                    if visible[walk] && topo.networks[bignet].zone == zone {
                        subnet_in_zone
                            .entry(sub)
                            .or_default()
                            .entry(bignet)
                            .or_default()
                            .insert(domain);
                        break;
                    }
                    match is_in.get(&walk) {
                        Some(&up) => walk = up,
                        None => break,
                    }
                }
            }

            if !relation_seen.insert((nat_bignet, nat_subnet)) {
                continue;
            }
            let mut bignet = entries[nat_bignet].orig;

            // Extend the `up` relation across zones where plain addresses
            // nest.
            if topo.networks[subnet].up.is_none()
                && bignet != subnet
                && topo.networks[bignet]
                    .prefix
                    .covers(&topo.networks[subnet].prefix)
            {
                topo.networks[subnet].up = Some(bignet);
            }

            let same_zone = topo.networks[bignet].zone == topo.networks[subnet].zone;
            if same_zone {
                // The supernet inherits has_other_subnet from its subnet,
                // possibly later.
                if topo.networks[subnet].has_other_subnet
                    || has_identical.contains(&orig_entry[&subnet])
                {
                    topo.networks[bignet].has_other_subnet = true;
                } else {
                    pending.entry(subnet).or_default().push(bignet);
                }
            } else {
                mark_with_pending(topo, &mut pending, bignet);
                // An aggregate below a supernet in another zone has
                // addresses elsewhere itself.
                if topo.networks[subnet].is_aggregate {
                    mark_with_pending(topo, &mut pending, subnet);
                }
            }

            if topo.networks[subnet].is_aggregate {
                continue;
            }

            // For the remaining checks use the next larger real network.
            'realnet: while topo.networks[entries[nat_bignet].orig].is_aggregate
                || !visible[nat_bignet]
            {
                if let Some(twin) = identical.get(&nat_bignet).and_then(|list| {
                    list.iter()
                        .copied()
                        .find(|&c| visible[c] && !topo.networks[entries[c].orig].is_aggregate)
                }) {
                    nat_bignet = twin;
                    break 'realnet;
                }
                match is_in.get(&nat_bignet) {
                    Some(&up) => nat_bignet = up,
                    None => continue 'subnet,
                }
            }
            bignet = entries[nat_bignet].orig;
            let same_zone = topo.networks[bignet].zone == topo.networks[subnet].zone;

            if let Some(severity) = options.check_subnets {
                if topo.networks[bignet].has_subnets
                    || entries[nat_subnet].subnet_of == Some(bignet)
                {
                    if entries[nat_subnet].authored
                        && entries[nat_subnet].subnet_of == Some(bignet)
                    {
                        subnet_of_used.insert((subnet, entries[nat_subnet].tag));
                    }
                } else {
                    if entries[nat_subnet].subnet_of.is_none() {
                        // Suppress repeated reports in other domains.
                        entries[nat_subnet].subnet_of = Some(bignet);
                    }
                    diag.report(
                        severity,
                        format!(
                            "{} is subnet of {} in {domain_name}.\n \
                             If desired, declare attribute 'subnet_of' or 'has_subnets'",
                            label(topo, &entries[nat_subnet]),
                            nat_label(topo, bignet, entries[nat_bignet].tag),
                        ),
                    );
                }
            }

            if !same_zone {
                check_subnets(
                    topo,
                    bignet,
                    subnet,
                    entries[nat_subnet].prefix,
                    entries[nat_subnet].tag,
                    Some(&domain_name),
                    diag,
                );
            }
        }
    }

    check_stable_relations(topo, domains, networks, &subnet_in_zone);
    set_max_secondary(topo, networks);
}

fn label(topo: &Topology, entry: &Entry) -> String {
    nat_label(topo, entry.orig, entry.tag)
}

fn mark_with_pending(
    topo: &mut Topology,
    pending: &mut BTreeMap<NetworkId, Vec<NetworkId>>,
    net: NetworkId,
) {
    let mut stack = vec![net];
    while let Some(current) = stack.pop() {
        if topo.networks[current].has_other_subnet {
            continue;
        }
        topo.networks[current].has_other_subnet = true;
        if let Some(list) = pending.remove(&current) {
            stack.extend(list);
        }
    }
}

/// Dynamic NAT to a loopback address is fine if every device carrying the
/// loopback binds the tag itself.
fn nat_to_loopback_ok(topo: &Topology, loopback_net: NetworkId, nat_entry: &Entry) -> bool {
    let Some(tag) = nat_entry.tag else {
        return false;
    };
    let mut devices = 0;
    let mut devices_ok = 0;
    for &iface in &topo.networks[loopback_net].interfaces {
        devices += 1;
        let router = topo.interfaces[iface].router;
        if topo.routers[router]
            .interfaces
            .iter()
            .any(|&i| topo.interfaces[i].bind_nat.contains(&tag))
        {
            devices_ok += 1;
        }
    }
    devices_ok == devices
}

/// Same-zone subnet relations must hold in every domain, unless one side
/// is hidden there. A domain where the relation breaks makes the supernet
/// unsafe as a rule endpoint and is recorded on it.
fn check_stable_relations(
    topo: &mut Topology,
    domains: &[DomainId],
    networks: &[NetworkId],
    subnet_in_zone: &BTreeMap<NetworkId, BTreeMap<NetworkId, BTreeSet<DomainId>>>,
) {
    let mut net_dom_hidden: BTreeMap<NetworkId, BTreeSet<DomainId>> = BTreeMap::new();
    for &net in networks {
        let hidden_tags: Vec<TagId> = topo.networks[net]
            .nat
            .iter()
            .filter(|(_, def)| def.kind.is_hidden())
            .map(|(&tag, _)| tag)
            .collect();
        if hidden_tags.is_empty() {
            continue;
        }
        let hidden_in: BTreeSet<DomainId> = domains
            .iter()
            .copied()
            .filter(|&domain| {
                hidden_tags
                    .iter()
                    .any(|&tag| topo.domains[domain].nat_set.contains(tag))
            })
            .collect();
        net_dom_hidden.insert(net, hidden_in);
    }

    let empty: BTreeSet<DomainId> = BTreeSet::new();
    for (&subnet, big_map) in subnet_in_zone {
        let sub_hidden = net_dom_hidden.get(&subnet).unwrap_or(&empty);
        for (&bignet, dom_set) in big_map {
            let big_hidden = net_dom_hidden.get(&bignet).unwrap_or(&empty);
            'domain: for &domain in domains {
                if dom_set.contains(&domain) {
                    continue;
                }
                if big_hidden.contains(&domain) || sub_hidden.contains(&domain) {
                    continue;
                }
                // Aggregate addresses cannot be changed by NAT.
                if topo.networks[subnet].is_aggregate && topo.networks[bignet].is_aggregate {
                    continue;
                }
                // The relation may hold transitively through intermediate
                // subnets.
                let mut up = subnet;
                loop {
                    let Some(next) = topo.networks[up].up else {
                        break;
                    };
                    let holds = subnet_in_zone
                        .get(&up)
                        .and_then(|m| m.get(&next))
                        .is_some_and(|doms| doms.contains(&domain));
                    if !holds {
                        break;
                    }
                    if next == bignet {
                        continue 'domain;
                    }
                    up = next;
                }
                // Identical addresses from dynamic NAT still relate.
                let dynamic_same = {
                    let map = &topo.domains[domain].nat_map;
                    match (map.nat_of(topo, subnet), map.nat_of(topo, bignet)) {
                        (Some(sub_def), Some(big_def)) => {
                            sub_def.kind == NatKind::Dynamic
                                && big_def.kind == NatKind::Dynamic
                                && sub_def.prefix == big_def.prefix
                        }
                        _ => false,
                    }
                };
                if dynamic_same {
                    continue;
                }
                topo.networks[bignet]
                    .unstable_nat
                    .entry(domain)
                    .or_default()
                    .push(subnet);
            }
        }
    }
}

/// Secondary optimization substitutes an object by its largest enclosing
/// network in the same zone. That network must not have subnets in other
/// zones and must keep a stable relation to the original network.
fn set_max_secondary(topo: &mut Topology, networks: &[NetworkId]) {
    for &net in networks {
        let Some(max) = topo.networks[net].max_routing_net else {
            continue;
        };
        // A rough estimate: any unstable relation on the routing supernet
        // disables it for a translated network.
        if !topo.networks[max].unstable_nat.is_empty() && !topo.networks[net].nat.is_empty() {
            topo.networks[net].max_routing_net = None;
            continue;
        }
        if !topo.networks[max].has_other_subnet {
            topo.networks[net].max_secondary_net = Some(max);
            continue;
        }
        let zone = topo.networks[net].zone;
        let mut up = topo.networks[net].up;
        while let Some(upper) = up {
            // The substitute must live in the same zone.
            if topo.networks[upper].zone != zone || topo.networks[upper].has_other_subnet {
                break;
            }
            if !topo.networks[upper].is_aggregate {
                topo.networks[net].max_secondary_net = Some(upper);
            }
            up = topo.networks[upper].up;
        }
    }
}

fn warn_useless_subnet_of(
    topo: &Topology,
    options: &Options,
    subnet_of_used: &BTreeSet<(NetworkId, Option<TagId>)>,
    diag: &mut Diagnostics,
) {
    if options.check_subnets.is_none() {
        return;
    }
    for (id, net) in topo.networks.iter() {
        if net.is_aggregate {
            continue;
        }
        if net.subnet_of.is_some() && !subnet_of_used.contains(&(id, None)) {
            diag.warn(format!("Useless 'subnet_of' at {}", net.name));
        }
        for (&tag, def) in &net.nat {
            if def.subnet_of.is_some() && !subnet_of_used.contains(&(id, Some(tag))) {
                diag.warn(format!(
                    "Useless 'subnet_of' at nat:{} of {}",
                    topo.tag_name(tag),
                    net.name
                ));
            }
        }
    }
}
