// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The topology model of the policy compiler.
//!
//! This crate owns the authored objects (zones, routers, interfaces,
//! networks, hosts and their NAT definitions) and the structures the
//! analysis phases compute over them (NAT domains, tag sets, NAT maps,
//! subnet relations). Objects live in per-run arenas and reference each
//! other through typed keys; interned state such as the tag table is a
//! field of [`Topology`], never a global.
//!
//! Construction is two-step: `add_*` calls populate the arenas and validate
//! local properties, [`Topology::finalize`] links the cross-object state
//! (zone interface lists, zone clusters) and reports soft findings. After
//! the analysis phases have run, the whole structure is read-only.

#![deny(clippy::all)]

mod addr;
mod builder;
mod errors;
mod key;
mod model;
mod tags;

pub use addr::{Address, NetObject};
pub use builder::{HostConfig, InterfaceConfig, NatDefConfig, NetworkConfig, RouterConfig};
pub use errors::TopologyError;
pub use key::{Arena, Key};
pub use model::{
    DomainId, Hardware, Host, HostAddr, HostId, IfaceAddr, IfaceId, Interface, NatDef, NatDomain,
    NatKind, NatMap, Network, NetworkId, Router, RouterId, Topology, Zone, ZoneId,
};
pub use tags::{NatSet, TagId, TagTable};
