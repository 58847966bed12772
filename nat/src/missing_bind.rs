// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Advisory search for plausibly missing `bind_nat` declarations.
//!
//! A tag found re-activated while still active usually means the tag leaked
//! around a cycle: somewhere an interface should have carried the tag to
//! contain it, but does not. Starting from the domain the conflicting
//! crossing came from, this search walks boundaries that do not mention the
//! tag and classifies each domain as reaching a directly-activated domain
//! (valid), not reaching one (invalid), or still unexplored. Where an
//! invalid reach joins a directly-activated domain, the joining interfaces
//! are reported: binding the tag there would have contained it. The
//! reported set is a best-effort hint; only the property that reported
//! interfaces sit on genuine borders of the tag's activation region is
//! kept.

use diag::Diagnostics;
use std::collections::{BTreeMap, BTreeSet};
use topology::{DomainId, RouterId, TagId, Topology};

pub(crate) fn report_missing_bindings(
    topo: &Topology,
    tag: TagId,
    from_domain: DomainId,
    diag: &mut Diagnostics,
) {
    let mut search = Search {
        topo,
        tag,
        memo: BTreeMap::new(),
        hints: BTreeSet::new(),
    };
    search.domain_reaches_binding(from_domain);
    let hints = search.hints;
    for (router, domain) in hints {
        let mut names: Vec<&str> = topo.routers[router]
            .interfaces
            .iter()
            .filter(|&&iface| topo.zones[topo.iface_zone(iface)].nat_domain == Some(domain))
            .map(|&iface| topo.interfaces[iface].name.as_str())
            .collect();
        names.sort_unstable();
        for name in names {
            diag.info(format!(
                "Possibly missing 'bind_nat = {}' at interface {name}",
                topo.tag_name(tag)
            ));
        }
    }
}

struct Search<'t> {
    topo: &'t Topology,
    tag: TagId,
    /// `Some(true)`: a directly-activated domain was reached from here.
    /// `Some(false)`: fully explored without success, or still on the
    /// current path (no information yet).
    memo: BTreeMap<DomainId, Option<bool>>,
    hints: BTreeSet<(RouterId, DomainId)>,
}

impl Search<'_> {
    /// Tell if some boundary activates the tag directly into `domain`.
    fn directly_activated(&self, domain: DomainId) -> bool {
        self.topo.domains[domain]
            .routers
            .iter()
            .any(|&router| self.topo.routers[router].nat_tags[&domain].contains(&self.tag))
    }

    fn domain_reaches_binding(&mut self, domain: DomainId) -> bool {
        if self.directly_activated(domain) {
            return true;
        }
        if let Some(known) = self.memo.get(&domain) {
            return known.unwrap_or(false);
        }
        self.memo.insert(domain, None);
        let mut found = false;
        for &router in &self.topo.domains[domain].routers {
            let here = &self.topo.routers[router].nat_tags[&domain];
            if here.contains(&self.tag) {
                continue;
            }
            for &next in &self.topo.routers[router].nat_domains {
                if next == domain {
                    continue;
                }
                if self.topo.routers[router].nat_tags[&next].contains(&self.tag) {
                    // The conflicting crossing itself, or another explicit
                    // binding boundary.
                    continue;
                }
                if self.directly_activated(next) {
                    self.hints.insert((router, next));
                    found = true;
                } else if self.domain_reaches_binding(next) {
                    found = true;
                }
            }
        }
        self.memo.insert(domain, Some(found));
        found
    }
}
