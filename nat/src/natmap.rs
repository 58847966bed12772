// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT map construction and distribution.
//!
//! A domain's tag set is turned into a direct network-to-translation
//! lookup. The map is stored on the domain, referenced from every hardware
//! port inside it, and routers printing real addresses in their ACLs get a
//! combined view over all their adjacent domains.

use crate::distribute::NatInfo;
use diag::Diagnostics;
use std::collections::BTreeSet;
use topology::{DomainId, NatKind, NatMap, NatSet, TagId, Topology};
use tracing::debug;

pub(crate) fn build_nat_maps(topo: &mut Topology, diag: &mut Diagnostics) {
    diag.progress("Building NAT maps");
    for domain in topo.domains.keys().collect::<Vec<_>>() {
        let set = topo.domains[domain].nat_set.clone();
        let name = topo.domains[domain].name.clone();
        let map = map_from_set(topo, &set, Some((name.as_str(), &mut *diag)));
        debug!("{name}: {} translated networks", map.iter().count());
        topo.domains[domain].nat_map = map;
    }
    // Hardware ports look up addresses through the domain they face.
    for router in topo.routers.keys().collect::<Vec<_>>() {
        for slot in 0..topo.routers[router].hardware.len() {
            let domain = topo.routers[router].hardware[slot]
                .interfaces
                .first()
                .and_then(|&iface| topo.zones[topo.iface_zone(iface)].nat_domain);
            topo.routers[router].hardware[slot].nat_domain = domain;
        }
    }
}

/// Build the network lookup for one tag set. At most one tag per network
/// may be active; identity translations yield no entry.
pub(crate) fn map_from_set(
    topo: &Topology,
    set: &NatSet,
    mut context: Option<(&str, &mut Diagnostics)>,
) -> NatMap {
    let mut map = NatMap::new();
    for (id, net) in topo.networks.iter() {
        let active: Vec<_> = net
            .nat
            .values()
            .filter(|def| set.contains(def.tag))
            .collect();
        if active.len() > 1 {
            if let Some((domain_name, diag)) = context.as_mut() {
                let names: Vec<String> = active
                    .iter()
                    .map(|def| format!("nat:{}", topo.tag_name(def.tag)))
                    .collect();
                diag.error(format!(
                    "Grouped {} of {} are both active in {domain_name}",
                    names.join(" and "),
                    net.name
                ));
            }
        }
        if let Some(def) = active.first() {
            if def.kind != NatKind::Identity {
                map.insert(id, def.tag);
            }
        }
    }
    map
}

/// Routers whose ACLs are printed with real addresses combine the views of
/// all adjacent domains.
pub(crate) fn set_real_ip_views(topo: &mut Topology, info: &NatInfo) {
    for router in topo.routers.keys().collect::<Vec<_>>() {
        if !topo.routers[router].acl_use_real_ip {
            continue;
        }
        let adjacent: BTreeSet<DomainId> = topo.routers[router]
            .interfaces
            .iter()
            .filter_map(|&iface| topo.zones[topo.iface_zone(iface)].nat_domain)
            .collect();
        if adjacent.is_empty() {
            continue;
        }
        let sets: Vec<&NatSet> = adjacent
            .iter()
            .map(|&domain| &topo.domains[domain].nat_set)
            .collect();
        let combined = combine_nat_sets(&sets, info);
        let map = map_from_set(topo, &combined, None);
        topo.routers[router].real_ip_set = Some(combined);
        topo.routers[router].real_ip_map = Some(map);
    }
}

/// Combine several tag sets into one set under which NAT mapping stays
/// mostly identical.
///
/// Single tags survive only if active in every input set. For a multi-NAT
/// group, agreement of all sets on one real member keeps that member
/// (hidden siblings are ignored, they do not affect addresses);
/// disagreement, or a set with no member active, drops the whole group. A
/// tag dropped for one group occurrence is dropped everywhere.
#[must_use]
pub fn combine_nat_sets(sets: &[&NatSet], info: &NatInfo) -> NatSet {
    if sets.len() == 1 {
        return sets[0].clone();
    }

    // Split tags into single tags and multi-NAT group occurrences.
    let mut combined: BTreeSet<TagId> = BTreeSet::new();
    let mut active_groups: Vec<usize> = Vec::new();
    let mut seen: BTreeSet<TagId> = BTreeSet::new();
    for set in sets {
        for tag in set.iter() {
            if !seen.insert(tag) {
                continue;
            }
            if let Some(group_ids) = info.tag_groups.get(&tag) {
                for &group in group_ids {
                    for &member in &info.groups[group] {
                        seen.insert(member);
                    }
                    if !active_groups.contains(&group) {
                        active_groups.push(group);
                    }
                }
            } else {
                combined.insert(tag);
            }
        }
    }

    // Intersection for single tags.
    for set in sets {
        combined.retain(|&tag| set.contains(tag));
    }

    // Per group, the active member of every set. `None` stands for a set
    // where no member is active.
    let mut ignore: BTreeSet<TagId> = BTreeSet::new();
    let mut to_add: BTreeSet<TagId> = BTreeSet::new();
    for &group in &active_groups {
        let members: BTreeSet<Option<TagId>> = sets
            .iter()
            .map(|set| {
                info.groups[group]
                    .iter()
                    .copied()
                    .find(|&tag| set.contains(tag))
            })
            .collect();
        let mut add: Option<TagId> = None;
        if !members.contains(&None) {
            let mut real: Option<TagId> = None;
            let mut multiple = false;
            for &tag in members.iter().flatten() {
                if info.kind(tag).is_some_and(NatKind::is_hidden) {
                    continue;
                }
                if real.is_some() {
                    multiple = true;
                    break;
                }
                real = Some(tag);
            }
            if !multiple {
                add = real;
            }
        }
        if let Some(tag) = add {
            to_add.insert(tag);
        }
        // A member not chosen here must not survive through another group
        // occurrence either.
        for &tag in members.iter().flatten() {
            if Some(tag) != add {
                ignore.insert(tag);
            }
        }
    }
    for tag in to_add {
        if !ignore.contains(&tag) {
            combined.insert(tag);
        }
    }
    combined.into_iter().collect()
}
