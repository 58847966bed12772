// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT domain partitioning.
//!
//! A depth-first traversal groups zones into maximal regions with one
//! active tag set. A router is crossed silently when the outbound interface
//! carries the same ordered tag list as the interface the traversal entered
//! by; any other interface makes the router domain-limiting there, and the
//! boundary tag list is recorded per touched domain for tag distribution.

use diag::Diagnostics;
use std::collections::{BTreeMap, BTreeSet};
use topology::{DomainId, IfaceId, NatDomain, NatMap, NatSet, RouterId, TagId, Topology, ZoneId};
use tracing::debug;

pub(crate) fn partition_domains(topo: &mut Topology, diag: &mut Diagnostics) {
    diag.progress("Partitioning NAT domains");
    let mut traversal = Traversal {
        active: BTreeMap::new(),
        loop_seen: BTreeSet::new(),
    };
    for zone in topo.zones.keys().collect::<Vec<_>>() {
        if topo.zones[zone].nat_domain.is_some() {
            continue;
        }
        let name = format!("nat_domain({})", topo.zones[zone].name);
        debug!("seeding {name}");
        let domain = topo.domains.push(NatDomain {
            name,
            zones: Vec::new(),
            routers: Vec::new(),
            nat_set: NatSet::new(),
            nat_map: NatMap::new(),
        });
        traversal.visit_zone(topo, zone, domain, None, diag);
        debug_assert!(traversal.active.is_empty());
    }
    warn_useless_bind(topo, diag);
}

struct Traversal {
    /// Routers on the current recursion path with the tag list they were
    /// entered by. Entries are removed again on every way out of
    /// `visit_zone`, error paths included.
    active: BTreeMap<RouterId, Vec<TagId>>,
    /// Guards against reporting one looped boundary per traversal
    /// direction.
    loop_seen: BTreeSet<(RouterId, DomainId)>,
}

impl Traversal {
    fn visit_zone(
        &mut self,
        topo: &mut Topology,
        zone: ZoneId,
        domain: DomainId,
        entered_by: Option<IfaceId>,
        diag: &mut Diagnostics,
    ) {
        topo.zones[zone].nat_domain = Some(domain);
        topo.domains[domain].zones.push(zone);
        for iface in topo.zones[zone].interfaces.clone() {
            if Some(iface) == entered_by {
                continue;
            }
            let router = topo.interfaces[iface].router;
            let in_tags = topo.interfaces[iface].bind_nat.clone();
            if let Some(recorded) = self.active.get(&router) {
                // Re-entered over a cycle. Consistent tag lists close the
                // cycle silently.
                if *recorded != in_tags {
                    self.report_loop(topo, router, domain, diag);
                }
                continue;
            }
            self.active.insert(router, in_tags.clone());
            for out in topo.routers[router].interfaces.clone() {
                if out == iface {
                    continue;
                }
                if topo.interfaces[out].bind_nat == in_tags {
                    let next_zone = topo.iface_zone(out);
                    if topo.zones[next_zone].nat_domain.is_none() {
                        self.visit_zone(topo, next_zone, domain, Some(out), diag);
                    }
                } else {
                    self.mark_border(topo, router, domain, &in_tags, diag);
                }
            }
            self.active.remove(&router);
        }
    }

    /// Record `router` as domain-limiting, with the tag list seen on the
    /// `domain` side of the boundary.
    fn mark_border(
        &mut self,
        topo: &mut Topology,
        router: RouterId,
        domain: DomainId,
        in_tags: &[TagId],
        diag: &mut Diagnostics,
    ) {
        match topo.routers[router].nat_tags.get(&domain) {
            None => {
                topo.routers[router]
                    .nat_tags
                    .insert(domain, in_tags.to_vec());
                topo.routers[router].nat_domains.push(domain);
                topo.domains[domain].routers.push(router);
            }
            Some(recorded) => {
                if recorded.as_slice() != in_tags {
                    self.report_loop(topo, router, domain, diag);
                }
            }
        }
    }

    fn report_loop(
        &mut self,
        topo: &Topology,
        router: RouterId,
        domain: DomainId,
        diag: &mut Diagnostics,
    ) {
        if self.loop_seen.insert((router, domain)) {
            diag.error(format!(
                "Inconsistent NAT applied in loop at {}",
                topo.routers[router].name
            ));
        }
    }
}

/// A tag bound identically on every interface of a router never creates a
/// boundary and has no effect. Routers serving only as VPN hub or spoke are
/// exempt; their bindings take effect on the tunnels.
fn warn_useless_bind(topo: &Topology, diag: &mut Diagnostics) {
    for (_, router) in topo.routers.iter() {
        if router.interfaces.is_empty() {
            continue;
        }
        let mut common: Option<BTreeSet<TagId>> = None;
        let mut all_vpn = true;
        for &iface in &router.interfaces {
            let iface = &topo.interfaces[iface];
            if !(iface.hub || iface.spoke) {
                all_vpn = false;
            }
            let bound: BTreeSet<TagId> = iface.bind_nat.iter().copied().collect();
            common = Some(match common {
                None => bound,
                Some(prev) => prev.intersection(&bound).copied().collect(),
            });
        }
        if all_vpn {
            continue;
        }
        let Some(common) = common else {
            continue;
        };
        let mut names: Vec<&str> = common.iter().map(|&t| topo.tag_name(t)).collect();
        names.sort_unstable();
        for tag in names {
            diag.warn(format!(
                "Useless nat:{tag} bound at every interface of {}",
                router.name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lpm::Prefix;
    use pretty_assertions::assert_eq;
    use topology::{InterfaceConfig, NetworkConfig, NetworkId, RouterConfig};

    fn prefix(s: &str) -> Prefix {
        s.parse().expect("valid prefix")
    }

    struct Builder {
        topo: Topology,
        counter: u8,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                topo: Topology::new(),
                counter: 0,
            }
        }

        fn zone(&mut self, name: &str) -> (ZoneId, NetworkId) {
            self.counter += 1;
            let zone = self.topo.add_zone(&format!("zone:{name}"));
            let net = self
                .topo
                .add_network(NetworkConfig::new(
                    &format!("network:{name}"),
                    prefix(&format!("10.{}.0.0/16", self.counter)),
                    zone,
                ))
                .expect("network");
            (zone, net)
        }

        fn link(&mut self, router: RouterId, name: &str, net: NetworkId, tags: &[&str]) {
            self.topo
                .add_interface(
                    InterfaceConfig::new(name, router, net).set_bind_nat(tags),
                )
                .expect("interface");
        }

        fn finish(mut self) -> (Topology, Diagnostics) {
            let mut diag = Diagnostics::new();
            self.topo.finalize(&mut diag).expect("finalize");
            partition_domains(&mut self.topo, &mut diag);
            (self.topo, diag)
        }
    }

    #[test]
    fn test_equal_tag_lists_share_a_domain() {
        let mut b = Builder::new();
        let (za, na) = b.zone("a");
        let (zb, nb) = b.zone("b");
        let (zc, nc) = b.zone("c");
        // r1 applies nothing anywhere: a and b share a domain.
        let r1 = b.topo.add_router(RouterConfig::new("router:r1"));
        b.link(r1, "r1.a", na, &[]);
        b.link(r1, "r1.b", nb, &[]);
        // r2 binds a tag toward c: c gets its own domain.
        let r2 = b.topo.add_router(RouterConfig::new("router:r2"));
        b.link(r2, "r2.b", nb, &[]);
        b.link(r2, "r2.c", nc, &["x"]);
        let (topo, diag) = b.finish();

        assert_eq!(topo.domains.len(), 2);
        assert_eq!(topo.zones[za].nat_domain, topo.zones[zb].nat_domain);
        assert_ne!(topo.zones[za].nat_domain, topo.zones[zc].nat_domain);
        // Only r2 limits domains, with the boundary tag lists of both sides.
        assert!(topo.routers[r1].nat_domains.is_empty());
        let da = topo.zones[za].nat_domain.expect("domain");
        let dc = topo.zones[zc].nat_domain.expect("domain");
        assert_eq!(topo.routers[r2].nat_domains, vec![da, dc]);
        assert_eq!(topo.routers[r2].nat_tags[&da], vec![]);
        let x = topo.tags.lookup("x").expect("tag");
        assert_eq!(topo.routers[r2].nat_tags[&dc], vec![x]);
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn test_inconsistent_loop_reports_once() {
        let mut b = Builder::new();
        let (_, na) = b.zone("a");
        let (_, nb) = b.zone("b");
        // Two parallel routers between the same zones; r2 binds a tag on one
        // side only, so the cycle carries contradicting tag lists.
        let r1 = b.topo.add_router(RouterConfig::new("router:r1"));
        b.link(r1, "r1.a", na, &[]);
        b.link(r1, "r1.b", nb, &[]);
        let r2 = b.topo.add_router(RouterConfig::new("router:r2"));
        b.link(r2, "r2.a", na, &[]);
        b.link(r2, "r2.b", nb, &["x"]);
        let (topo, diag) = b.finish();

        // Both zones collapse into one domain over r1.
        assert_eq!(topo.domains.len(), 1);
        let errors: Vec<&str> = diag.errors().collect();
        assert_eq!(errors, vec!["Inconsistent NAT applied in loop at router:r2"]);
    }

    #[test]
    fn test_useless_bind_nat_warning() {
        let mut b = Builder::new();
        let (_, na) = b.zone("a");
        let (_, nb) = b.zone("b");
        let r = b.topo.add_router(RouterConfig::new("router:r"));
        b.link(r, "r.a", na, &["x"]);
        b.link(r, "r.b", nb, &["x"]);
        let (_, diag) = b.finish();

        let warnings: Vec<&str> = diag.warnings().collect();
        assert_eq!(
            warnings,
            vec![
                "nat:x is bound at an interface but never defined",
                "Useless nat:x bound at every interface of router:r",
            ]
        );
    }

    #[test]
    fn test_vpn_only_router_is_exempt() {
        let mut b = Builder::new();
        let (_, na) = b.zone("a");
        let (_, nb) = b.zone("b");
        let r = b.topo.add_router(RouterConfig::new("router:vpn"));
        b.topo
            .add_interface(
                InterfaceConfig::new("vpn.a", r, na)
                    .set_bind_nat(&["x"])
                    .set_hub(true),
            )
            .expect("interface");
        b.topo
            .add_interface(
                InterfaceConfig::new("vpn.b", r, nb)
                    .set_bind_nat(&["x"])
                    .set_spoke(true),
            )
            .expect("interface");
        let (_, diag) = b.finish();

        let warnings: Vec<&str> = diag.warnings().collect();
        // Only the undefined-tag warning remains.
        assert_eq!(
            warnings,
            vec!["nat:x is bound at an interface but never defined"]
        );
    }
}
