// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type to represent IP-version neutral network prefixes.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    #[error("Invalid prefix: {0}")]
    Invalid(String),
    #[error("Mask length {0} is invalid")]
    InvalidLength(u8),
}

/// An IPv4 or IPv6 network prefix with an IP version-independent API.
///
/// The address part is always kept in canonical form, i.e. with the host
/// bits cleared, so that equality and ordering are structural.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Prefix {
    V4(Ipv4Net),
    V6(Ipv6Net),
}

impl Prefix {
    pub const MAX_LEN_V4: u8 = 32;
    pub const MAX_LEN_V6: u8 = 128;

    /// Build a prefix from an address and a mask length.
    ///
    /// # Errors
    /// Fails if the mask length exceeds the maximum for the address family.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PrefixError> {
        match addr {
            IpAddr::V4(a) => Ok(Prefix::V4(
                Ipv4Net::new(a, len)
                    .map_err(|_| PrefixError::InvalidLength(len))?
                    .trunc(),
            )),
            IpAddr::V6(a) => Ok(Prefix::V6(
                Ipv6Net::new(a, len)
                    .map_err(|_| PrefixError::InvalidLength(len))?
                    .trunc(),
            )),
        }
    }

    /// Build the host prefix (/32 or /128) of an address.
    #[must_use]
    pub fn host(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => {
                let Ok(net) = Ipv4Net::new(a, Self::MAX_LEN_V4) else {
                    unreachable!("host mask length is always valid")
                };
                Prefix::V4(net)
            }
            IpAddr::V6(a) => {
                let Ok(net) = Ipv6Net::new(a, Self::MAX_LEN_V6) else {
                    unreachable!("host mask length is always valid")
                };
                Prefix::V6(net)
            }
        }
    }

    /// The network address of the prefix.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        match self {
            Prefix::V4(net) => IpAddr::V4(net.network()),
            Prefix::V6(net) => IpAddr::V6(net.network()),
        }
    }

    /// Get the mask length.
    #[must_use]
    pub fn length(&self) -> u8 {
        match self {
            Prefix::V4(net) => net.prefix_len(),
            Prefix::V6(net) => net.prefix_len(),
        }
    }

    /// Maximum mask length for the prefix's address family.
    #[must_use]
    pub fn max_length(&self) -> u8 {
        match self {
            Prefix::V4(_) => Self::MAX_LEN_V4,
            Prefix::V6(_) => Self::MAX_LEN_V6,
        }
    }

    /// Check whether the prefix is IPv4.
    #[must_use]
    pub fn is_ipv4(&self) -> bool {
        matches!(self, Prefix::V4(_))
    }

    /// Tell if the prefix covers a single address.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.length() == self.max_length()
    }

    /// Check whether the prefix covers a given address.
    #[must_use]
    pub fn covers_addr(&self, addr: &IpAddr) -> bool {
        match (self, addr) {
            (Prefix::V4(net), IpAddr::V4(a)) => net.contains(a),
            (Prefix::V6(net), IpAddr::V6(a)) => net.contains(a),
            _ => false,
        }
    }

    /// Check whether the prefix covers another prefix.
    #[must_use]
    pub fn covers(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Prefix::V4(net), Prefix::V4(o)) => net.contains(o),
            (Prefix::V6(net), Prefix::V6(o)) => net.contains(o),
            _ => false,
        }
    }

    /// Combine the high-order bits of this prefix with the low-order bits of
    /// `addr`. Merging an address with its own network is the identity, which
    /// makes the operation uniform for translated and untranslated networks.
    /// A family mismatch leaves the address unchanged.
    #[must_use]
    pub fn merge_host_bits(&self, addr: IpAddr) -> IpAddr {
        match (self, addr) {
            (Prefix::V4(net), IpAddr::V4(a)) => {
                let mask = u32::from(net.netmask());
                let high = u32::from(net.network());
                IpAddr::V4(Ipv4Addr::from(high | (u32::from(a) & !mask)))
            }
            (Prefix::V6(net), IpAddr::V6(a)) => {
                let mask = u128::from(net.netmask());
                let high = u128::from(net.network());
                IpAddr::V6(Ipv6Addr::from(high | (u128::from(a) & !mask)))
            }
            _ => addr,
        }
    }
}

impl TryFrom<(IpAddr, u8)> for Prefix {
    type Error = PrefixError;

    fn try_from((addr, len): (IpAddr, u8)) -> Result<Self, Self::Error> {
        Prefix::new(addr, len)
    }
}

impl From<Ipv4Net> for Prefix {
    fn from(value: Ipv4Net) -> Self {
        Prefix::V4(value.trunc())
    }
}

impl From<Ipv6Net> for Prefix {
    fn from(value: Ipv6Net) -> Self {
        Prefix::V6(value.trunc())
    }
}

impl From<Prefix> for IpNet {
    fn from(value: Prefix) -> Self {
        match value {
            Prefix::V4(net) => IpNet::V4(net),
            Prefix::V6(net) => IpNet::V6(net),
        }
    }
}

impl FromStr for Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match IpNet::from_str(s) {
            Ok(IpNet::V4(net)) => Ok(Prefix::V4(net.trunc())),
            Ok(IpNet::V6(net)) => Ok(Prefix::V6(net.trunc())),
            Err(_) => Err(PrefixError::Invalid(s.to_string())),
        }
    }
}

/// Only for testing. Will panic with badly formatted prefix strings.
#[cfg(any(test, feature = "testing"))]
impl From<&str> for Prefix {
    fn from(s: &str) -> Self {
        match Prefix::from_str(s) {
            Ok(prefix) => prefix,
            Err(e) => panic!("{e}"),
        }
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::V4(net) => write!(f, "{net}"),
            Prefix::V6(net) => write!(f, "{net}"),
        }
    }
}
