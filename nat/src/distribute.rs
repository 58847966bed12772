// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT tag distribution.
//!
//! Every tag bound at a domain boundary becomes active in the domain the
//! binding interface faces and stays active across further boundaries until
//! an interface carries the tag again. Re-activation of a still-active tag
//! and invalid transitions between grouped tags are consistency errors;
//! both end the affected branch but leave other branches running so a
//! single pass reports as much as possible.

use crate::missing_bind;
use diag::Diagnostics;
use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;
use topology::{DomainId, NatKind, NetworkId, RouterId, TagId, Topology};
use tracing::debug;

/// Tag-level facts shared by distribution, map building and set
/// combination: the kind per tag and the multi-NAT groups.
#[derive(Debug, Default)]
pub struct NatInfo {
    /// NAT kind per tag; identical for all definitions of the tag.
    pub kinds: BTreeMap<TagId, NatKind>,
    /// Distinct sets of tags co-defined on a single network.
    pub groups: Vec<BTreeSet<TagId>>,
    /// Which groups each tag belongs to.
    pub tag_groups: BTreeMap<TagId, Vec<usize>>,
    /// Networks carrying a definition per tag, in network order.
    pub networks_with_tag: BTreeMap<TagId, Vec<NetworkId>>,
}

impl NatInfo {
    #[must_use]
    pub fn kind(&self, tag: TagId) -> Option<NatKind> {
        self.kinds.get(&tag).copied()
    }

    /// Tell if two distinct tags are co-defined on some network.
    #[must_use]
    pub fn grouped_with(&self, tag: TagId, other: TagId) -> bool {
        self.tag_groups
            .get(&tag)
            .is_some_and(|groups| groups.iter().any(|&g| self.groups[g].contains(&other)))
    }
}

/// Collect per-tag facts and enforce that a tag keeps one kind everywhere.
pub(crate) fn setup_nat_info(topo: &Topology, diag: &mut Diagnostics) -> NatInfo {
    let mut info = NatInfo::default();
    let mut conflicting: BTreeSet<TagId> = BTreeSet::new();
    let mut group_index: BTreeMap<Vec<TagId>, usize> = BTreeMap::new();
    for (id, net) in topo.networks.iter() {
        for (&tag, def) in &net.nat {
            info.networks_with_tag.entry(tag).or_default().push(id);
            match info.kinds.entry(tag) {
                Entry::Vacant(vacant) => {
                    vacant.insert(def.kind);
                }
                Entry::Occupied(occupied) => {
                    let known = *occupied.get();
                    if known != def.kind && conflicting.insert(tag) {
                        diag.error(format!(
                            "All definitions of nat:{} must use the same kind; found {} and {}",
                            topo.tag_name(tag),
                            known,
                            def.kind
                        ));
                    }
                }
            }
        }
        let defs: Vec<_> = net.nat.values().collect();
        for (i, one) in defs.iter().enumerate() {
            for two in &defs[i + 1..] {
                if one.kind == two.kind && one.prefix == two.prefix {
                    diag.warn(format!(
                        "nat:{} and nat:{} of {} define the same translation",
                        topo.tag_name(one.tag),
                        topo.tag_name(two.tag),
                        net.name
                    ));
                }
            }
        }
        if net.nat.len() > 1 {
            let tags: Vec<TagId> = net.nat.keys().copied().collect();
            if let Entry::Vacant(vacant) = group_index.entry(tags) {
                let group: BTreeSet<TagId> = vacant.key().iter().copied().collect();
                vacant.insert(info.groups.len());
                info.groups.push(group);
            }
        }
    }
    for (idx, group) in info.groups.iter().enumerate() {
        for &tag in group {
            info.tag_groups.entry(tag).or_default().push(idx);
        }
    }
    info
}

/// Distribute every bound tag from its activation boundary over the domain
/// graph.
pub(crate) fn distribute_tags(topo: &mut Topology, info: &NatInfo, diag: &mut Diagnostics) {
    diag.progress("Distributing NAT tags");
    let mut transition_seen: BTreeSet<(TagId, TagId)> = BTreeSet::new();
    let mut twice_seen: BTreeSet<(TagId, RouterId)> = BTreeSet::new();
    for router in topo.routers.keys().collect::<Vec<_>>() {
        for domain in topo.routers[router].nat_domains.clone() {
            for tag in topo.routers[router].nat_tags[&domain].clone() {
                // Bound but undefined tags were already reported.
                if info.kind(tag).is_none() {
                    continue;
                }
                distribute_tag(
                    topo,
                    info,
                    tag,
                    domain,
                    &mut transition_seen,
                    &mut twice_seen,
                    diag,
                );
            }
        }
    }
}

fn distribute_tag(
    topo: &mut Topology,
    info: &NatInfo,
    tag: TagId,
    origin: DomainId,
    transition_seen: &mut BTreeSet<(TagId, TagId)>,
    twice_seen: &mut BTreeSet<(TagId, RouterId)>,
    diag: &mut Diagnostics,
) {
    // Another binding already activated the tag here; marking is
    // idempotent.
    if !topo.domains[origin].nat_set.insert(tag) {
        return;
    }
    debug!(
        "distributing nat:{} from {}",
        topo.tag_name(tag),
        topo.domains[origin].name
    );
    let mut stack = vec![origin];
    while let Some(domain) = stack.pop() {
        for router in topo.domains[domain].routers.clone() {
            let in_tags = topo.routers[router].nat_tags[&domain].clone();
            if in_tags.contains(&tag) {
                // This boundary is the tag's own activation; the original
                // addresses live beyond it.
                continue;
            }
            for next in topo.routers[router].nat_domains.clone() {
                if next == domain {
                    continue;
                }
                let out_tags = topo.routers[router].nat_tags[&next].clone();
                if out_tags.contains(&tag) {
                    if twice_seen.insert((tag, router)) {
                        diag.error(format!(
                            "nat:{} is reactivated at {} while still active",
                            topo.tag_name(tag),
                            topo.routers[router].name
                        ));
                        missing_bind::report_missing_bindings(topo, tag, domain, diag);
                    }
                    continue;
                }
                if let Some(sibling) = out_tags
                    .iter()
                    .copied()
                    .find(|&other| other != tag && info.grouped_with(tag, other))
                {
                    // The active member of the group switches at this
                    // boundary; the current tag ends here either way.
                    validate_transition(topo, info, tag, sibling, router, transition_seen, diag);
                    continue;
                }
                if topo.domains[next].nat_set.insert(tag) {
                    stack.push(next);
                }
            }
        }
    }
}

/// A boundary replacing grouped tag `tag` by `sibling` must not lose or
/// sharpen address information, and the grouping must hold wherever `tag`
/// is used.
fn validate_transition(
    topo: &Topology,
    info: &NatInfo,
    tag: TagId,
    sibling: TagId,
    router: RouterId,
    transition_seen: &mut BTreeSet<(TagId, TagId)>,
    diag: &mut Diagnostics,
) {
    if !transition_seen.insert((tag, sibling)) {
        return;
    }
    let tag_name = topo.tag_name(tag);
    let sibling_name = topo.tag_name(sibling);
    let router_name = &topo.routers[router].name;
    let Some(kind) = info.kind(tag) else {
        return;
    };
    if kind.is_hidden() {
        diag.error(format!(
            "Must not change hidden nat:{tag_name} using nat:{sibling_name} at {router_name}"
        ));
        return;
    }
    if kind == NatKind::Dynamic
        && info
            .kind(sibling)
            .is_some_and(|sibling_kind| !sibling_kind.is_dynamic())
    {
        diag.error(format!(
            "Must not change dynamic nat:{tag_name} to static nat:{sibling_name} at {router_name}"
        ));
        return;
    }
    for &net in info.networks_with_tag.get(&tag).into_iter().flatten() {
        if !topo.networks[net].nat.contains_key(&sibling) {
            diag.error(format!(
                "nat:{sibling_name} must also be defined at {} to replace nat:{tag_name}",
                topo.networks[net].name
            ));
            return;
        }
    }
}

/// A network whose hidden or dynamic translation is active in its own
/// domain would translate itself in place.
pub(crate) fn check_nat_location(topo: &Topology, diag: &mut Diagnostics) {
    for (id, net) in topo.networks.iter() {
        let Some(domain) = topo.domain_of(id) else {
            continue;
        };
        for (&tag, def) in &net.nat {
            if !def.kind.is_dynamic() {
                continue;
            }
            if topo.domains[domain].nat_set.contains(tag) {
                diag.error(format!(
                    "{} is translated by nat:{} inside its own NAT domain",
                    net.name,
                    topo.tag_name(tag)
                ));
            }
        }
    }
}
