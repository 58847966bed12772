// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Authored topology objects and the structures computed over them.

use crate::key::{Arena, Key};
use crate::tags::{NatSet, TagId, TagTable};
use lpm::Prefix;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

pub type ZoneId = Key<Zone>;
pub type NetworkId = Key<Network>;
pub type RouterId = Key<Router>;
pub type IfaceId = Key<Interface>;
pub type HostId = Key<Host>;
pub type DomainId = Key<NatDomain>;

/// The kind of one NAT definition. All definitions sharing a tag must agree
/// on the kind.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum NatKind {
    /// 1:1 translation of the whole network; host bits survive.
    Static,
    /// The network collapses to a new prefix; host bits are lost unless an
    /// object carries an explicit translation of its own.
    Dynamic,
    /// The network becomes unaddressable where the tag is active.
    Hidden,
    /// The network keeps its own address; used to switch NAT off again.
    Identity,
}

impl NatKind {
    /// Hidden translation behaves like dynamic translation with no
    /// reachable address.
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(self, NatKind::Dynamic | NatKind::Hidden)
    }

    #[must_use]
    pub fn is_hidden(self) -> bool {
        matches!(self, NatKind::Hidden)
    }
}

/// One NAT definition, attached to a network and selected by its tag.
#[derive(Debug, Clone)]
pub struct NatDef {
    pub tag: TagId,
    pub kind: NatKind,
    pub prefix: Prefix,
    pub subnet_of: Option<NetworkId>,
    pub descr: Option<String>,
}

/// A network or aggregate. Fields below the `computed` marker are filled by
/// the analysis phases and must not be set by hand.
#[derive(Debug)]
pub struct Network {
    pub name: String,
    pub prefix: Prefix,
    pub zone: ZoneId,
    pub is_aggregate: bool,
    pub loopback: bool,
    pub bridged: bool,
    pub unnumbered: bool,
    pub tunnel: bool,
    pub subnet_of: Option<NetworkId>,
    pub has_subnets: bool,
    pub nat: BTreeMap<TagId, NatDef>,
    pub hosts: Vec<HostId>,
    pub interfaces: Vec<IfaceId>,
    // computed
    pub up: Option<NetworkId>,
    pub has_other_subnet: bool,
    pub max_routing_net: Option<NetworkId>,
    pub max_secondary_net: Option<NetworkId>,
    pub unstable_nat: BTreeMap<DomainId, Vec<NetworkId>>,
    pub sub_networks: Vec<NetworkId>,
}

/// Host address: a single IP or an inclusive range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostAddr {
    Ip(IpAddr),
    Range(IpAddr, IpAddr),
}

impl HostAddr {
    /// Representative address, used wherever a single address is needed.
    #[must_use]
    pub fn first(&self) -> IpAddr {
        match *self {
            HostAddr::Ip(ip) | HostAddr::Range(ip, _) => ip,
        }
    }
}

#[derive(Debug)]
pub struct Host {
    pub name: String,
    pub network: NetworkId,
    pub addr: HostAddr,
    /// Static per-host translations under dynamic NAT, keyed by tag.
    pub nat: BTreeMap<TagId, IpAddr>,
}

/// Address of a router interface. A closed set of variants; only `Addr`
/// carries a concrete IP.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IfaceAddr {
    Addr(IpAddr),
    Negotiated,
    Unnumbered,
    Tunnel,
    Short,
    Bridged,
}

impl IfaceAddr {
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        match *self {
            IfaceAddr::Addr(ip) => Some(ip),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub router: RouterId,
    pub network: NetworkId,
    pub addr: IfaceAddr,
    /// Ordered tag list; order matters for boundary comparison.
    pub bind_nat: Vec<TagId>,
    /// Static per-interface translations under dynamic NAT, keyed by tag.
    pub nat: BTreeMap<TagId, IpAddr>,
    /// Slot in the owning router's hardware list.
    pub hardware: Option<usize>,
    pub hub: bool,
    pub spoke: bool,
    pub loopback: bool,
}

/// A hardware port of a router, grouping one or more logical interfaces.
#[derive(Debug)]
pub struct Hardware {
    pub name: String,
    pub interfaces: Vec<IfaceId>,
    // computed
    pub nat_domain: Option<DomainId>,
}

#[derive(Debug)]
pub struct Router {
    pub name: String,
    pub managed: bool,
    /// Device model prints real addresses in ACLs and needs its own
    /// combined NAT view.
    pub acl_use_real_ip: bool,
    pub interfaces: Vec<IfaceId>,
    pub hardware: Vec<Hardware>,
    // computed
    pub nat_domains: Vec<DomainId>,
    /// Boundary tag list per adjacent domain; only set on domain-limiting
    /// routers.
    pub nat_tags: BTreeMap<DomainId, Vec<TagId>>,
    pub real_ip_set: Option<NatSet>,
    pub real_ip_map: Option<NatMap>,
}

#[derive(Debug)]
pub struct Zone {
    pub name: String,
    pub networks: Vec<NetworkId>,
    /// All router interfaces attached to networks of this zone, sorted by
    /// interface name.
    pub interfaces: Vec<IfaceId>,
    pub aggregates: BTreeMap<Prefix, NetworkId>,
    // computed
    pub nat_domain: Option<DomainId>,
    /// Zones reachable over unmanaged routers, self included, sorted.
    pub cluster: Vec<ZoneId>,
}

/// A maximal set of zones sharing one active tag set. Computed, never
/// authored.
#[derive(Debug)]
pub struct NatDomain {
    pub name: String,
    pub zones: Vec<ZoneId>,
    /// Domain-limiting routers at the border of this domain.
    pub routers: Vec<RouterId>,
    pub nat_set: NatSet,
    pub nat_map: NatMap,
}

/// Per-domain lookup from a network to its active NAT definition.
#[derive(Debug, Default, Clone)]
pub struct NatMap {
    active: BTreeMap<NetworkId, TagId>,
}

impl NatMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: NetworkId, tag: TagId) {
        self.active.insert(network, tag);
    }

    #[must_use]
    pub fn active_tag(&self, network: NetworkId) -> Option<TagId> {
        self.active.get(&network).copied()
    }

    /// The active NAT definition for a network, if any.
    #[must_use]
    pub fn nat_of<'t>(&self, topo: &'t Topology, network: NetworkId) -> Option<&'t NatDef> {
        self.active
            .get(&network)
            .and_then(|&tag| topo.nat_def(network, tag))
    }

    /// Translated prefix of a network, or its own prefix when untranslated.
    #[must_use]
    pub fn effective_prefix(&self, topo: &Topology, network: NetworkId) -> Prefix {
        self.nat_of(topo, network)
            .map_or(topo.networks[network].prefix, |def| def.prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetworkId, TagId)> {
        self.active.iter().map(|(&n, &t)| (n, t))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// The complete model for one compiler run.
#[derive(Debug, Default)]
pub struct Topology {
    pub tags: TagTable,
    pub zones: Arena<Zone>,
    pub networks: Arena<Network>,
    pub routers: Arena<Router>,
    pub interfaces: Arena<Interface>,
    pub hosts: Arena<Host>,
    pub domains: Arena<NatDomain>,
    pub(crate) finalized: bool,
}

impl Topology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a tag name.
    pub fn tag(&mut self, name: &str) -> TagId {
        self.tags.intern(name)
    }

    #[must_use]
    pub fn tag_name(&self, tag: TagId) -> &str {
        self.tags.name(tag)
    }

    #[must_use]
    pub fn nat_def(&self, network: NetworkId, tag: TagId) -> Option<&NatDef> {
        self.networks[network].nat.get(&tag)
    }

    #[must_use]
    pub fn zone_of(&self, network: NetworkId) -> ZoneId {
        self.networks[network].zone
    }

    #[must_use]
    pub fn iface_zone(&self, iface: IfaceId) -> ZoneId {
        self.zone_of(self.interfaces[iface].network)
    }

    /// The NAT domain of a network's zone. Only available after domain
    /// partitioning.
    #[must_use]
    pub fn domain_of(&self, network: NetworkId) -> Option<DomainId> {
        self.zones[self.zone_of(network)].nat_domain
    }
}
