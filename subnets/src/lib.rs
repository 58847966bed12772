// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Subnet and supernet relations between networks.
//!
//! Two passes mark each network with the smallest network enclosing it.
//! The first pass works per zone cluster on the addresses effective inside
//! the cluster; the second pass builds a combined universe of every network
//! and its translations per NAT partition, intersects the raw containment
//! relation with per-domain visibility, and derives the attributes that
//! make supernets safe or unsafe to use in rules: `has_other_subnet`,
//! `unstable_nat`, `max_routing_net` and `max_secondary_net`.

#![deny(clippy::all)]

mod domain;
mod zone;

pub use domain::find_subnets_in_nat_domain;
pub use zone::find_subnets_in_zone;

use topology::{NetworkId, TagId, Topology};

/// User-visible label of a network or one of its translations.
pub(crate) fn nat_label(topo: &Topology, net: NetworkId, tag: Option<TagId>) -> String {
    match tag {
        None => topo.networks[net].name.clone(),
        Some(tag) => topo
            .nat_def(net, tag)
            .and_then(|def| def.descr.clone())
            .unwrap_or_else(|| {
                format!("nat:{}({})", topo.tag_name(tag), topo.networks[net].name)
            }),
    }
}
