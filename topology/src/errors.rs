// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("NAT tag '{tag}' is already defined on {network}")]
    DuplicateNatTag { tag: String, network: String },

    #[error("Address family of nat:{tag} does not match {network}")]
    NatFamilyMismatch { tag: String, network: String },

    #[error("Static nat:{tag} must keep the mask length of {network}")]
    StaticLengthMismatch { tag: String, network: String },

    #[error("nat:{tag} needs a prefix")]
    MissingNatPrefix { tag: String },

    #[error("Aggregate {network} must not carry NAT definitions")]
    NatOnAggregate { network: String },

    #[error("Duplicate aggregate for {prefix} in {zone}")]
    DuplicateAggregate { prefix: String, zone: String },

    #[error("Address of {object} is not covered by {network}")]
    AddressOutsideNetwork { object: String, network: String },

    #[error("Invalid address range of {object}")]
    InvalidRange { object: String },

    #[error("Topology has already been finalized")]
    AlreadyFinalized,
}
