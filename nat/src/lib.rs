// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT domain computation for the policy compiler.
//!
//! Zones sharing one active tag set everywhere inside them are grouped into
//! NAT domains; each tag is then distributed from its binding router to
//! every domain where it stays active, with the consistency checks that
//! catch looped, re-activated and ill-grouped bindings. The resulting
//! per-domain tag sets are turned into direct network-to-translation
//! lookups, cached at domain, router and hardware granularity.
//!
//! Everything here runs once, synchronously, before any phase that consumes
//! the results; after [`distribute_nat_info`] returns, the computed state is
//! read-only.

#![deny(clippy::all)]

mod distribute;
mod domains;
mod missing_bind;
mod natmap;

pub use distribute::NatInfo;
pub use natmap::combine_nat_sets;

use diag::Diagnostics;
use topology::Topology;

/// Run the complete NAT analysis: domain partitioning, tag distribution,
/// location checks and NAT map construction.
///
/// Inconsistencies are recorded in `diag`; independent branches keep being
/// analyzed so one run reports as many problems as possible.
pub fn distribute_nat_info(topo: &mut Topology, diag: &mut Diagnostics) -> NatInfo {
    domains::partition_domains(topo, diag);
    let info = distribute::setup_nat_info(topo, diag);
    distribute::distribute_tags(topo, &info, diag);
    distribute::check_nat_location(topo, diag);
    natmap::build_nat_maps(topo, diag);
    natmap::set_real_ip_views(topo, &info);
    info
}
