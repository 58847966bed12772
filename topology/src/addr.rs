// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Effective addresses of topology objects under NAT.
//!
//! Given the NAT map of a domain, every address-bearing object resolves to
//! the address it shows inside that domain. Static and identity NAT merge
//! the translated network bits with the object's own host bits; the merge is
//! a no-op for untranslated networks, so one code path serves both cases.
//! Dynamic NAT loses object-level precision unless the object carries a
//! static translation of its own, and hidden NAT has no address at all.

use crate::model::{HostId, IfaceAddr, IfaceId, NatMap, NetworkId, Topology};
use crate::tags::TagId;
use lpm::Prefix;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// The effective address of an object in some NAT domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Address {
    Prefix(Prefix),
    /// The owning network is hidden here; there is nothing to print.
    Hidden,
}

impl Address {
    #[must_use]
    pub fn prefix(&self) -> Option<Prefix> {
        match *self {
            Address::Prefix(prefix) => Some(prefix),
            Address::Hidden => None,
        }
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        matches!(self, Address::Hidden)
    }
}

impl NatMap {
    /// Effective address of a whole network in this map's domain.
    #[must_use]
    pub fn network_address(&self, topo: &Topology, network: NetworkId) -> Address {
        match self.nat_of(topo, network) {
            Some(def) if def.kind.is_hidden() => Address::Hidden,
            Some(def) => Address::Prefix(def.prefix),
            None => Address::Prefix(topo.networks[network].prefix),
        }
    }
}

/// An address-bearing object. The set of variants is closed; all of them
/// share the `address` capability.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NetObject {
    Network(NetworkId),
    Host(HostId),
    Interface(IfaceId),
}

impl NetObject {
    /// Resolve the object's effective address under the given NAT map.
    /// Returns `None` for interfaces that have no address of their own
    /// (unnumbered, tunnel, short).
    #[must_use]
    pub fn address(&self, topo: &Topology, map: &NatMap) -> Option<Address> {
        match *self {
            NetObject::Network(n) => Some(map.network_address(topo, n)),
            NetObject::Host(h) => {
                let host = &topo.hosts[h];
                Some(object_address(
                    topo,
                    map,
                    host.network,
                    host.addr.first(),
                    &host.nat,
                ))
            }
            NetObject::Interface(i) => {
                let iface = &topo.interfaces[i];
                match iface.addr {
                    IfaceAddr::Addr(ip) => {
                        Some(object_address(topo, map, iface.network, ip, &iface.nat))
                    }
                    IfaceAddr::Negotiated | IfaceAddr::Bridged => {
                        Some(map.network_address(topo, iface.network))
                    }
                    IfaceAddr::Unnumbered | IfaceAddr::Tunnel | IfaceAddr::Short => None,
                }
            }
        }
    }
}

fn object_address(
    topo: &Topology,
    map: &NatMap,
    network: NetworkId,
    ip: IpAddr,
    overrides: &BTreeMap<TagId, IpAddr>,
) -> Address {
    match map.nat_of(topo, network) {
        Some(def) if def.kind.is_dynamic() => {
            if let Some(&fixed) = overrides.get(&def.tag) {
                // Static translation recorded for this object.
                Address::Prefix(Prefix::host(fixed))
            } else if def.kind.is_hidden() {
                Address::Hidden
            } else {
                // Object-level precision is lost under dynamic translation.
                Address::Prefix(def.prefix)
            }
        }
        Some(def) => Address::Prefix(Prefix::host(def.prefix.merge_host_bits(ip))),
        None => Address::Prefix(Prefix::host(ip)),
    }
}
