// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Builder-style construction of the topology model.
//!
//! The `*Config` structs carry the authored attributes of one object;
//! `Topology::add_*` validates them and stores the object in its arena.
//! Cross-object state is wired up in [`Topology::finalize`].

use crate::errors::TopologyError;
use crate::model::{
    Hardware, Host, HostAddr, HostId, IfaceAddr, IfaceId, Interface, NatDef, NatKind, Network,
    NetworkId, Router, RouterId, Topology, Zone, ZoneId,
};
use diag::Diagnostics;
use lpm::Prefix;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    name: String,
    prefix: Prefix,
    zone: ZoneId,
    aggregate: bool,
    loopback: bool,
    bridged: bool,
    unnumbered: bool,
    tunnel: bool,
    subnet_of: Option<NetworkId>,
    has_subnets: bool,
}

impl NetworkConfig {
    #[must_use]
    pub fn new(name: &str, prefix: Prefix, zone: ZoneId) -> Self {
        Self {
            name: name.to_string(),
            prefix,
            zone,
            aggregate: false,
            loopback: false,
            bridged: false,
            unnumbered: false,
            tunnel: false,
            subnet_of: None,
            has_subnets: false,
        }
    }

    #[must_use]
    pub fn set_aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }

    #[must_use]
    pub fn set_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    #[must_use]
    pub fn set_bridged(mut self, bridged: bool) -> Self {
        self.bridged = bridged;
        self
    }

    #[must_use]
    pub fn set_unnumbered(mut self, unnumbered: bool) -> Self {
        self.unnumbered = unnumbered;
        self
    }

    #[must_use]
    pub fn set_tunnel(mut self, tunnel: bool) -> Self {
        self.tunnel = tunnel;
        self
    }

    #[must_use]
    pub fn set_subnet_of(mut self, up: NetworkId) -> Self {
        self.subnet_of = Some(up);
        self
    }

    #[must_use]
    pub fn set_has_subnets(mut self, has_subnets: bool) -> Self {
        self.has_subnets = has_subnets;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NatDefConfig {
    tag: String,
    kind: NatKind,
    prefix: Option<Prefix>,
    subnet_of: Option<NetworkId>,
    descr: Option<String>,
}

impl NatDefConfig {
    #[must_use]
    pub fn new(tag: &str, kind: NatKind) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            prefix: None,
            subnet_of: None,
            descr: None,
        }
    }

    #[must_use]
    pub fn set_prefix(mut self, prefix: Prefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    #[must_use]
    pub fn set_subnet_of(mut self, up: NetworkId) -> Self {
        self.subnet_of = Some(up);
        self
    }

    #[must_use]
    pub fn set_descr(mut self, descr: &str) -> Self {
        self.descr = Some(descr.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    name: String,
    managed: bool,
    acl_use_real_ip: bool,
}

impl RouterConfig {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            managed: true,
            acl_use_real_ip: false,
        }
    }

    #[must_use]
    pub fn set_managed(mut self, managed: bool) -> Self {
        self.managed = managed;
        self
    }

    #[must_use]
    pub fn set_acl_use_real_ip(mut self, acl_use_real_ip: bool) -> Self {
        self.acl_use_real_ip = acl_use_real_ip;
        self
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    name: String,
    router: RouterId,
    network: NetworkId,
    addr: IfaceAddr,
    bind_nat: Vec<String>,
    nat: Vec<(String, IpAddr)>,
    hardware: Option<String>,
    hub: bool,
    spoke: bool,
    loopback: bool,
}

impl InterfaceConfig {
    #[must_use]
    pub fn new(name: &str, router: RouterId, network: NetworkId) -> Self {
        Self {
            name: name.to_string(),
            router,
            network,
            addr: IfaceAddr::Short,
            bind_nat: Vec::new(),
            nat: Vec::new(),
            hardware: None,
            hub: false,
            spoke: false,
            loopback: false,
        }
    }

    #[must_use]
    pub fn set_addr(mut self, addr: IfaceAddr) -> Self {
        self.addr = addr;
        self
    }

    #[must_use]
    pub fn set_ip(self, ip: IpAddr) -> Self {
        self.set_addr(IfaceAddr::Addr(ip))
    }

    /// Ordered tag list applied at this interface.
    #[must_use]
    pub fn set_bind_nat(mut self, tags: &[&str]) -> Self {
        self.bind_nat = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Static translation of this interface under a dynamic tag.
    #[must_use]
    pub fn set_nat_ip(mut self, tag: &str, ip: IpAddr) -> Self {
        self.nat.push((tag.to_string(), ip));
        self
    }

    #[must_use]
    pub fn set_hardware(mut self, name: &str) -> Self {
        self.hardware = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn set_hub(mut self, hub: bool) -> Self {
        self.hub = hub;
        self
    }

    #[must_use]
    pub fn set_spoke(mut self, spoke: bool) -> Self {
        self.spoke = spoke;
        self
    }

    #[must_use]
    pub fn set_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    name: String,
    network: NetworkId,
    addr: HostAddr,
    nat: Vec<(String, IpAddr)>,
}

impl HostConfig {
    #[must_use]
    pub fn new(name: &str, network: NetworkId, addr: HostAddr) -> Self {
        Self {
            name: name.to_string(),
            network,
            addr,
            nat: Vec::new(),
        }
    }

    /// Static translation of this host under a dynamic tag.
    #[must_use]
    pub fn set_nat_ip(mut self, tag: &str, ip: IpAddr) -> Self {
        self.nat.push((tag.to_string(), ip));
        self
    }
}

impl Topology {
    pub fn add_zone(&mut self, name: &str) -> ZoneId {
        self.zones.push(Zone {
            name: name.to_string(),
            networks: Vec::new(),
            interfaces: Vec::new(),
            aggregates: BTreeMap::new(),
            nat_domain: None,
            cluster: Vec::new(),
        })
    }

    /// Add a network or aggregate to its zone.
    ///
    /// # Errors
    /// Fails when an aggregate with the same prefix already exists in the
    /// zone.
    pub fn add_network(&mut self, config: NetworkConfig) -> Result<NetworkId, TopologyError> {
        let zone = config.zone;
        if config.aggregate && self.zones[zone].aggregates.contains_key(&config.prefix) {
            return Err(TopologyError::DuplicateAggregate {
                prefix: config.prefix.to_string(),
                zone: self.zones[zone].name.clone(),
            });
        }
        let id = self.networks.push(Network {
            name: config.name,
            prefix: config.prefix,
            zone,
            is_aggregate: config.aggregate,
            loopback: config.loopback,
            bridged: config.bridged,
            unnumbered: config.unnumbered,
            tunnel: config.tunnel,
            subnet_of: config.subnet_of,
            has_subnets: config.has_subnets,
            nat: BTreeMap::new(),
            hosts: Vec::new(),
            interfaces: Vec::new(),
            up: None,
            has_other_subnet: false,
            max_routing_net: None,
            max_secondary_net: None,
            unstable_nat: BTreeMap::new(),
            sub_networks: Vec::new(),
        });
        if config.aggregate {
            self.zones[zone].aggregates.insert(config.prefix, id);
        } else {
            self.zones[zone].networks.push(id);
        }
        Ok(id)
    }

    /// Attach a NAT definition to a network.
    ///
    /// # Errors
    /// Fails on duplicate tags, missing or ill-matched prefixes, and on
    /// aggregates, which cannot be translated.
    pub fn add_nat(
        &mut self,
        network: NetworkId,
        config: NatDefConfig,
    ) -> Result<(), TopologyError> {
        if self.networks[network].is_aggregate {
            return Err(TopologyError::NatOnAggregate {
                network: self.networks[network].name.clone(),
            });
        }
        let tag = self.tags.intern(&config.tag);
        if self.networks[network].nat.contains_key(&tag) {
            return Err(TopologyError::DuplicateNatTag {
                tag: config.tag,
                network: self.networks[network].name.clone(),
            });
        }
        let own = self.networks[network].prefix;
        let prefix = match (config.kind, config.prefix) {
            (NatKind::Identity, None) => own,
            (_, Some(prefix)) => prefix,
            (_, None) => {
                return Err(TopologyError::MissingNatPrefix { tag: config.tag });
            }
        };
        if prefix.is_ipv4() != own.is_ipv4() {
            return Err(TopologyError::NatFamilyMismatch {
                tag: config.tag,
                network: self.networks[network].name.clone(),
            });
        }
        if matches!(config.kind, NatKind::Static | NatKind::Identity)
            && prefix.length() != own.length()
        {
            return Err(TopologyError::StaticLengthMismatch {
                tag: config.tag,
                network: self.networks[network].name.clone(),
            });
        }
        self.networks[network].nat.insert(
            tag,
            NatDef {
                tag,
                kind: config.kind,
                prefix,
                subnet_of: config.subnet_of,
                descr: config.descr,
            },
        );
        Ok(())
    }

    pub fn add_router(&mut self, config: RouterConfig) -> RouterId {
        self.routers.push(Router {
            name: config.name,
            managed: config.managed,
            acl_use_real_ip: config.acl_use_real_ip,
            interfaces: Vec::new(),
            hardware: Vec::new(),
            nat_domains: Vec::new(),
            nat_tags: BTreeMap::new(),
            real_ip_set: None,
            real_ip_map: None,
        })
    }

    /// Add an interface, wiring it into its router, network and hardware.
    ///
    /// # Errors
    /// Fails when the interface address is not covered by its network.
    pub fn add_interface(&mut self, config: InterfaceConfig) -> Result<IfaceId, TopologyError> {
        if let IfaceAddr::Addr(ip) = config.addr {
            let net = &self.networks[config.network];
            if !net.prefix.covers_addr(&ip) {
                return Err(TopologyError::AddressOutsideNetwork {
                    object: config.name,
                    network: net.name.clone(),
                });
            }
        }
        let bind_nat = config
            .bind_nat
            .iter()
            .map(|t| self.tags.intern(t))
            .collect();
        let nat = config
            .nat
            .iter()
            .map(|(t, ip)| (self.tags.intern(t), *ip))
            .collect();
        let hardware = config
            .hardware
            .as_deref()
            .map(|name| self.hardware_slot(config.router, name));
        let id = self.interfaces.push(Interface {
            name: config.name,
            router: config.router,
            network: config.network,
            addr: config.addr,
            bind_nat,
            nat,
            hardware,
            hub: config.hub,
            spoke: config.spoke,
            loopback: config.loopback,
        });
        self.routers[config.router].interfaces.push(id);
        if let Some(slot) = hardware {
            self.routers[config.router].hardware[slot].interfaces.push(id);
        }
        self.networks[config.network].interfaces.push(id);
        Ok(id)
    }

    /// Add a host to its network.
    ///
    /// # Errors
    /// Fails when the address is outside the network or the range is
    /// reversed or mixes address families.
    pub fn add_host(&mut self, config: HostConfig) -> Result<HostId, TopologyError> {
        let net = &self.networks[config.network];
        match config.addr {
            HostAddr::Ip(ip) => {
                if !net.prefix.covers_addr(&ip) {
                    return Err(TopologyError::AddressOutsideNetwork {
                        object: config.name,
                        network: net.name.clone(),
                    });
                }
            }
            HostAddr::Range(lo, hi) => {
                if lo.is_ipv4() != hi.is_ipv4() || lo > hi {
                    return Err(TopologyError::InvalidRange {
                        object: config.name,
                    });
                }
                if !net.prefix.covers_addr(&lo) || !net.prefix.covers_addr(&hi) {
                    return Err(TopologyError::AddressOutsideNetwork {
                        object: config.name,
                        network: net.name.clone(),
                    });
                }
            }
        }
        let nat = config
            .nat
            .iter()
            .map(|(t, ip)| (self.tags.intern(t), *ip))
            .collect();
        let id = self.hosts.push(Host {
            name: config.name,
            network: config.network,
            addr: config.addr,
            nat,
        });
        self.networks[config.network].hosts.push(id);
        Ok(id)
    }

    fn hardware_slot(&mut self, router: RouterId, name: &str) -> usize {
        let hardware = &mut self.routers[router].hardware;
        if let Some(slot) = hardware.iter().position(|h| h.name == name) {
            return slot;
        }
        hardware.push(Hardware {
            name: name.to_string(),
            interfaces: Vec::new(),
            nat_domain: None,
        });
        hardware.len() - 1
    }

    /// Wire up cross-object state and report soft findings.
    ///
    /// # Errors
    /// Fails when called twice.
    pub fn finalize(&mut self, diag: &mut Diagnostics) -> Result<(), TopologyError> {
        if self.finalized {
            return Err(TopologyError::AlreadyFinalized);
        }
        self.finalized = true;

        // Zone interface lists, sorted by interface name for reproducible
        // traversal order.
        let mut by_zone: BTreeMap<ZoneId, Vec<(String, IfaceId)>> = BTreeMap::new();
        for (id, iface) in self.interfaces.iter() {
            let zone = self.networks[iface.network].zone;
            by_zone
                .entry(zone)
                .or_default()
                .push((iface.name.clone(), id));
        }
        for (zone, mut list) in by_zone {
            list.sort();
            self.zones[zone].interfaces = list.into_iter().map(|(_, id)| id).collect();
        }

        self.build_clusters();

        // A bound tag no network defines can never become active.
        let mut defined: BTreeSet<&str> = BTreeSet::new();
        for (_, net) in self.networks.iter() {
            for tag in net.nat.keys() {
                defined.insert(self.tags.name(*tag));
            }
        }
        let mut bound: BTreeSet<&str> = BTreeSet::new();
        for (_, iface) in self.interfaces.iter() {
            for tag in &iface.bind_nat {
                bound.insert(self.tags.name(*tag));
            }
        }
        let undefined: Vec<String> = bound
            .difference(&defined)
            .map(|t| (*t).to_string())
            .collect();
        for tag in undefined {
            diag.warn(format!(
                "nat:{tag} is bound at an interface but never defined"
            ));
        }
        Ok(())
    }

    /// Group zones joined by unmanaged routers into clusters.
    fn build_clusters(&mut self) {
        let mut adjacency: BTreeMap<ZoneId, BTreeSet<ZoneId>> = BTreeMap::new();
        for (_, router) in self.routers.iter() {
            if router.managed {
                continue;
            }
            let zones: BTreeSet<ZoneId> = router
                .interfaces
                .iter()
                .map(|&i| self.networks[self.interfaces[i].network].zone)
                .collect();
            for &a in &zones {
                for &b in &zones {
                    if a != b {
                        adjacency.entry(a).or_default().insert(b);
                    }
                }
            }
        }
        let mut seen: BTreeSet<ZoneId> = BTreeSet::new();
        for zone in self.zones.keys().collect::<Vec<_>>() {
            if seen.contains(&zone) {
                continue;
            }
            let mut component = vec![zone];
            let mut stack = vec![zone];
            seen.insert(zone);
            while let Some(current) = stack.pop() {
                if let Some(next) = adjacency.get(&current) {
                    for &n in next {
                        if seen.insert(n) {
                            component.push(n);
                            stack.push(n);
                        }
                    }
                }
            }
            component.sort_unstable();
            for &member in &component {
                self.zones[member].cluster = component.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(s: &str) -> Prefix {
        s.parse().expect("valid prefix")
    }

    #[test]
    fn test_nat_validation() {
        let mut topo = Topology::new();
        let z = topo.add_zone("zone:a");
        let n = topo
            .add_network(NetworkConfig::new("network:a", prefix("10.0.0.0/24"), z))
            .expect("network");

        // Static NAT must keep the mask length.
        let bad = topo.add_nat(
            n,
            NatDefConfig::new("s", NatKind::Static).set_prefix(prefix("192.0.2.0/25")),
        );
        assert_eq!(
            bad,
            Err(TopologyError::StaticLengthMismatch {
                tag: "s".to_string(),
                network: "network:a".to_string(),
            })
        );

        topo.add_nat(
            n,
            NatDefConfig::new("s", NatKind::Static).set_prefix(prefix("192.0.2.0/24")),
        )
        .expect("static nat");

        // Tags are unique per network.
        let dup = topo.add_nat(
            n,
            NatDefConfig::new("s", NatKind::Dynamic).set_prefix(prefix("192.0.3.0/24")),
        );
        assert!(matches!(dup, Err(TopologyError::DuplicateNatTag { .. })));

        // Identity NAT defaults to the network's own prefix.
        topo.add_nat(n, NatDefConfig::new("id", NatKind::Identity))
            .expect("identity nat");
        let tag = topo.tags.lookup("id").expect("interned");
        assert_eq!(topo.nat_def(n, tag).expect("def").prefix, prefix("10.0.0.0/24"));

        // Family mismatch is rejected.
        let v6 = topo.add_nat(
            n,
            NatDefConfig::new("x", NatKind::Dynamic).set_prefix(prefix("2001:db8::/64")),
        );
        assert!(matches!(v6, Err(TopologyError::NatFamilyMismatch { .. })));
    }

    #[test]
    fn test_interface_and_host_checks() {
        let mut topo = Topology::new();
        let z = topo.add_zone("zone:a");
        let n = topo
            .add_network(NetworkConfig::new("network:a", prefix("10.0.0.0/24"), z))
            .expect("network");
        let r = topo.add_router(RouterConfig::new("router:r"));

        let outside = topo.add_interface(
            InterfaceConfig::new("r.a", r, n).set_ip("10.0.1.1".parse().expect("ip")),
        );
        assert!(matches!(
            outside,
            Err(TopologyError::AddressOutsideNetwork { .. })
        ));

        let iface = topo
            .add_interface(
                InterfaceConfig::new("r.a", r, n)
                    .set_ip("10.0.0.1".parse().expect("ip"))
                    .set_hardware("eth0"),
            )
            .expect("interface");
        assert_eq!(topo.interfaces[iface].hardware, Some(0));
        assert_eq!(topo.routers[r].hardware[0].interfaces, vec![iface]);

        let reversed = topo.add_host(HostConfig::new(
            "host:h",
            n,
            HostAddr::Range("10.0.0.9".parse().expect("ip"), "10.0.0.5".parse().expect("ip")),
        ));
        assert!(matches!(reversed, Err(TopologyError::InvalidRange { .. })));
    }

    #[test]
    fn test_clusters_over_unmanaged_routers() {
        let mut topo = Topology::new();
        let za = topo.add_zone("zone:a");
        let zb = topo.add_zone("zone:b");
        let zc = topo.add_zone("zone:c");
        let na = topo
            .add_network(NetworkConfig::new("network:a", prefix("10.0.1.0/24"), za))
            .expect("network");
        let nb = topo
            .add_network(NetworkConfig::new("network:b", prefix("10.0.2.0/24"), zb))
            .expect("network");
        let nc = topo
            .add_network(NetworkConfig::new("network:c", prefix("10.0.3.0/24"), zc))
            .expect("network");

        // Unmanaged router joins a and b into one cluster; managed router
        // keeps c separate.
        let u = topo.add_router(RouterConfig::new("router:u").set_managed(false));
        topo.add_interface(InterfaceConfig::new("u.a", u, na)).expect("iface");
        topo.add_interface(InterfaceConfig::new("u.b", u, nb)).expect("iface");
        let m = topo.add_router(RouterConfig::new("router:m"));
        topo.add_interface(InterfaceConfig::new("m.b", m, nb)).expect("iface");
        topo.add_interface(InterfaceConfig::new("m.c", m, nc)).expect("iface");

        let mut diag = Diagnostics::new();
        topo.finalize(&mut diag).expect("finalize");
        assert_eq!(topo.zones[za].cluster, vec![za, zb]);
        assert_eq!(topo.zones[zb].cluster, vec![za, zb]);
        assert_eq!(topo.zones[zc].cluster, vec![zc]);
        assert_eq!(topo.zones[zb].interfaces.len(), 2);
    }

    #[test]
    fn test_undefined_bound_tag_warning() {
        let mut topo = Topology::new();
        let z = topo.add_zone("zone:a");
        let n = topo
            .add_network(NetworkConfig::new("network:a", prefix("10.0.0.0/24"), z))
            .expect("network");
        let r = topo.add_router(RouterConfig::new("router:r"));
        topo.add_interface(InterfaceConfig::new("r.a", r, n).set_bind_nat(&["ghost"]))
            .expect("iface");

        let mut diag = Diagnostics::new();
        topo.finalize(&mut diag).expect("finalize");
        let warnings: Vec<&str> = diag.warnings().collect();
        assert_eq!(
            warnings,
            vec!["nat:ghost is bound at an interface but never defined"]
        );
    }
}
