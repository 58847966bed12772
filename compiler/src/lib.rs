// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Phase driver for the address-analysis core.
//!
//! The phases run strictly in order: NAT domains and tag distribution,
//! then NAT maps, then the two subnet passes. Each phase keeps checking
//! independent branches after recording an error, so one run reports as
//! many problems as possible, but any recorded error aborts the run before
//! a consumer of the published structures could see inconsistent data.

#![deny(clippy::all)]

use diag::{CompileError, Diagnostics, Options};
use nat::NatInfo;
use topology::Topology;

/// Results published by a successful run, beyond the attributes stored in
/// the topology itself.
#[derive(Debug)]
pub struct Compiled {
    /// Tag-level facts needed by consumers combining several domains'
    /// views, e.g. per-owner exports.
    pub nat_info: NatInfo,
}

/// Run the analysis phases over a finalized topology.
///
/// # Errors
/// Returns [`CompileError::AbortedByErrors`] after the phases finish when
/// any fatal inconsistency was recorded.
pub fn compile(
    topo: &mut Topology,
    options: &Options,
    diag: &mut Diagnostics,
) -> Result<Compiled, CompileError> {
    let nat_info = nat::distribute_nat_info(topo, diag);
    if !diag.reached_limit() {
        subnets::find_subnets_in_zone(topo, diag);
    }
    if !diag.reached_limit() {
        subnets::find_subnets_in_nat_domain(topo, options, diag);
    }
    if diag.has_errors() {
        return Err(CompileError::AbortedByErrors {
            count: diag.error_count(),
        });
    }
    Ok(Compiled { nat_info })
}
