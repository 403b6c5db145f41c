// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Next-hop variants for RIB routes.

use crate::store::Key;
use net::interface::InterfaceName;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};

/// How a prefix is reached.
///
/// The variant carries its address in the matching family type, so a
/// next-hop can never claim one family and hold another.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum NextHop {
    /// Reached through a named interface.
    Interface(InterfaceName),
    /// Reached via an IPv4 gateway.
    V4(Ipv4Addr),
    /// Reached via an IPv6 gateway.
    V6(Ipv6Addr),
}

/// The numeric id of a next-hop kind. Zero is reserved.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(u8)]
pub enum NextHopKind {
    /// A named-interface next-hop.
    Interface = 1,
    /// An IPv4 gateway next-hop.
    V4 = 2,
    /// An IPv6 gateway next-hop.
    V6 = 3,
}

impl NextHop {
    /// The kind of this next-hop.
    #[must_use]
    pub fn kind(&self) -> NextHopKind {
        match self {
            NextHop::Interface(_) => NextHopKind::Interface,
            NextHop::V4(_) => NextHopKind::V4,
            NextHop::V6(_) => NextHopKind::V6,
        }
    }
}

impl NextHopKind {
    /// The binary index key of this kind.
    #[must_use]
    pub fn key(self) -> Key {
        vec![self as u8]
    }
}

impl Display for NextHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextHop::Interface(name) => write!(f, "dev {name}"),
            NextHop::V4(addr) => write!(f, "via {addr}"),
            NextHop::V6(addr) => write!(f, "via {addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_and_nonzero() {
        let hops = [
            NextHop::Interface("eth0".try_into().unwrap()),
            NextHop::V4("10.0.0.1".parse().unwrap()),
            NextHop::V6("fd00::1".parse().unwrap()),
        ];
        let mut keys: Vec<_> = hops.iter().map(|h| h.kind().key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), hops.len());
        assert!(keys.iter().all(|k| k[0] != 0));
    }
}
