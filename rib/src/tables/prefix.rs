// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IP-version neutral destination prefixes with a binary index key.

use crate::store::Key;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

// Unique ids used for indexing the prefix kinds. Zero is reserved.
const PREFIX_KIND_IPV4: u8 = 1;
const PREFIX_KIND_IPV6: u8 = 2;

/// A destination network, IPv4 or IPv6.
///
/// Always canonical: host bits are masked away at construction, so textual
/// and binary representations of equal prefixes are equal.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Prefix {
    /// An IPv4 network.
    V4(Ipv4Net),
    /// An IPv6 network.
    V6(Ipv6Net),
}

impl Prefix {
    /// The kind byte that keeps v4 and v6 prefixes apart in indexes.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Prefix::V4(_) => PREFIX_KIND_IPV4,
            Prefix::V6(_) => PREFIX_KIND_IPV6,
        }
    }

    /// The ordered binary index key: kind byte, network address bytes,
    /// prefix length.
    #[must_use]
    pub fn key(&self) -> Key {
        let mut key = Vec::with_capacity(18);
        key.push(self.kind());
        match self {
            Prefix::V4(net) => key.extend_from_slice(&net.addr().octets()),
            Prefix::V6(net) => key.extend_from_slice(&net.addr().octets()),
        }
        key.push(self.prefix_len());
        key
    }

    /// The network address of the prefix.
    #[must_use]
    pub fn as_address(&self) -> IpAddr {
        match self {
            Prefix::V4(net) => IpAddr::V4(net.addr()),
            Prefix::V6(net) => IpAddr::V6(net.addr()),
        }
    }

    /// The prefix length in bits.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        match self {
            Prefix::V4(net) => net.prefix_len(),
            Prefix::V6(net) => net.prefix_len(),
        }
    }
}

impl From<IpNet> for Prefix {
    fn from(value: IpNet) -> Self {
        match value.trunc() {
            IpNet::V4(net) => Prefix::V4(net),
            IpNet::V6(net) => Prefix::V6(net),
        }
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

impl FromStr for Prefix {
    type Err = ipnet::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Prefix::from(s.parse::<IpNet>()?))
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prefix::V4(net) => write!(f, "{net}"),
            Prefix::V6(net) => write!(f, "{net}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_masks_host_bits() {
        let prefix: Prefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.1.0.0/16");
        assert_eq!(prefix.as_address().to_string(), "10.1.0.0");
    }

    #[test]
    fn families_never_share_keys() {
        // ::/1 and 128.0.0.0/1 share address bytes prefixes but not kinds
        let v4: Prefix = "0.0.0.0/0".parse().unwrap();
        let v6: Prefix = "::/0".parse().unwrap();
        assert_ne!(v4.key()[0], v6.key()[0]);
    }

    #[test]
    fn key_distinguishes_prefix_lengths() {
        let a: Prefix = "10.0.0.0/24".parse().unwrap();
        let b: Prefix = "10.0.0.0/25".parse().unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn order_follows_key_order() {
        let mut prefixes: Vec<Prefix> = ["10.0.1.0/24", "10.0.0.0/24", "fd00::/64", "0.0.0.0/0"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        prefixes.sort();
        let mut keys: Vec<_> = prefixes.iter().map(Prefix::key).collect();
        let sorted = {
            let mut k = keys.clone();
            k.sort();
            k
        };
        assert_eq!(keys, sorted);
        keys.dedup();
        assert_eq!(keys.len(), prefixes.len());
    }
}
