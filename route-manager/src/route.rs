// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Partition-scoped kernel route manipulation.
//!
//! Every route this module touches is scoped by a [`RoutePartition`]: the
//! `{table, protocol}` pair a single writer owns. Listing filters on both
//! members of the pair; dropping either filter would let one writer delete
//! another subsystem's routes on its next reconcile.

use crate::{KernelError, Manager, PrefixSet};
use futures::TryStreamExt;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use net::interface::InterfaceIndex;
use net::route::{AddressFamily, RouteProtocolId, RouteTableId};
use rtnetlink::RouteMessageBuilder;
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute, RouteMessage, RouteProtocol};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use tracing::debug;

/// The `{table, protocol}` pair that scopes one writer's kernel routes.
///
/// No two writers may share a partition; configuration validation enforces
/// this before any writer starts.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RoutePartition {
    /// The kernel route table written to.
    pub table: RouteTableId,
    /// The protocol id stamped on every route.
    pub protocol: RouteProtocolId,
}

impl Display for RoutePartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table {table} proto {proto}",
            table = self.table,
            proto = self.protocol
        )
    }
}

/// Build the netlink route message for `prefix` within `partition`, leaving
/// via `link`.
pub(crate) fn build_route_message(
    partition: RoutePartition,
    link: InterfaceIndex,
    prefix: &IpNet,
) -> RouteMessage {
    let protocol = RouteProtocol::from(partition.protocol.to_u8());
    match prefix {
        IpNet::V4(v4) => RouteMessageBuilder::<std::net::Ipv4Addr>::new()
            .destination_prefix(v4.addr(), v4.prefix_len())
            .table_id(partition.table.to_u32())
            .protocol(protocol)
            .output_interface(link.to_u32())
            .build(),
        IpNet::V6(v6) => RouteMessageBuilder::<std::net::Ipv6Addr>::new()
            .destination_prefix(v6.addr(), v6.prefix_len())
            .table_id(partition.table.to_u32())
            .protocol(protocol)
            .output_interface(link.to_u32())
            .build(),
    }
}

/// The table id a route message is in, honoring the attribute form tables
/// above 255 are dumped with.
pub(crate) fn table_of(message: &RouteMessage) -> u32 {
    for attribute in &message.attributes {
        if let RouteAttribute::Table(table) = attribute {
            return *table;
        }
    }
    u32::from(message.header.table)
}

/// True when `message` belongs to `partition`.
pub(crate) fn partition_matches(message: &RouteMessage, partition: RoutePartition) -> bool {
    table_of(message) == partition.table.to_u32()
        && u8::from(message.header.protocol) == partition.protocol.to_u8()
}

/// The destination prefix of a route message, if it has one.
///
/// Routes without a destination (default routes) yield `None`.
pub(crate) fn destination_of(message: &RouteMessage) -> Option<IpNet> {
    let prefix_len = message.header.destination_prefix_length;
    for attribute in &message.attributes {
        if let RouteAttribute::Destination(destination) = attribute {
            let net = match destination {
                RouteAddress::Inet(addr) => IpNet::V4(Ipv4Net::new(*addr, prefix_len).ok()?),
                RouteAddress::Inet6(addr) => IpNet::V6(Ipv6Net::new(*addr, prefix_len).ok()?),
                _ => return None,
            };
            return Some(net.trunc());
        }
    }
    None
}

fn parse_prefix(prefix: &str) -> Result<IpNet, KernelError> {
    prefix
        .parse::<IpNet>()
        .map_err(|_| KernelError::InvalidPrefix(prefix.to_string()))
}

impl Manager<RoutePartition> {
    /// Replace-or-insert a route to every prefix in `prefixes`.
    ///
    /// Fails on the first error; routes already applied are left in place
    /// for the next reconcile pass to account for.
    pub async fn replace(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        for prefix in prefixes.iter() {
            let net = parse_prefix(prefix)?;
            debug!("replacing route {net} ({partition}, oif {link})");
            self.handle()
                .route()
                .add(build_route_message(partition, link, &net))
                .replace()
                .execute()
                .await?;
        }
        Ok(())
    }

    /// Delete the route to every prefix in `prefixes`. A route the kernel
    /// no longer has is the idempotent outcome, not an error.
    pub async fn remove(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        for prefix in prefixes.iter() {
            let net = parse_prefix(prefix)?;
            debug!("deleting route {net} ({partition}, oif {link})");
            match self
                .handle()
                .route()
                .del(build_route_message(partition, link, &net))
                .execute()
                .await
            {
                Ok(()) => {}
                Err(err) => {
                    let err = KernelError::from(err);
                    if !err.is_not_found() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// List the destination prefixes of every route in `partition` across
    /// the requested address families.
    pub async fn list(
        &self,
        partition: RoutePartition,
        families: &[AddressFamily],
    ) -> Result<PrefixSet, KernelError> {
        let mut set = PrefixSet::new();
        for family in families {
            let filter = match family {
                AddressFamily::Ipv4 => RouteMessageBuilder::<std::net::Ipv4Addr>::new().build(),
                AddressFamily::Ipv6 => RouteMessageBuilder::<std::net::Ipv6Addr>::new().build(),
            };
            let mut request = self.handle().route().get(filter).execute();
            while let Some(message) = request.try_next().await? {
                if !partition_matches(&message, partition) {
                    continue;
                }
                if let Some(destination) = destination_of(&message) {
                    set.add(destination.to_string());
                }
            }
        }
        Ok(set)
    }
}

/// Canonicalize an address into the host prefix (/32 or /128) routing
/// treats a single IP as.
#[must_use]
pub fn host_prefix(addr: IpAddr) -> IpNet {
    match addr {
        IpAddr::V4(v4) => IpNet::V4(Ipv4Net::new_assert(v4, 32)),
        IpAddr::V6(v6) => IpNet::V6(Ipv6Net::new_assert(v6, 128)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn partition(table: u32, protocol: u8) -> RoutePartition {
        RoutePartition {
            table: table.try_into().unwrap(),
            protocol: protocol.try_into().unwrap(),
        }
    }

    fn link(index: u32) -> InterfaceIndex {
        InterfaceIndex::try_new(index).unwrap()
    }

    #[test]
    fn builds_scoped_v4_route() {
        let p = partition(100, 201);
        let net: IpNet = "10.0.0.0/24".parse().unwrap();
        let message = build_route_message(p, link(7), &net);

        assert!(partition_matches(&message, p));
        assert_eq!(destination_of(&message), Some(net));
        assert!(
            message
                .attributes
                .iter()
                .any(|attribute| matches!(attribute, RouteAttribute::Oif(7)))
        );
    }

    #[test]
    fn builds_scoped_v6_route() {
        let p = partition(100, 201);
        let net: IpNet = "fd00::/64".parse().unwrap();
        let message = build_route_message(p, link(7), &net);

        assert!(partition_matches(&message, p));
        assert_eq!(destination_of(&message), Some(net));
    }

    #[test]
    fn wide_table_ids_round_trip() {
        let p = partition(10_000, 201);
        let net: IpNet = "10.0.0.0/24".parse().unwrap();
        let message = build_route_message(p, link(7), &net);
        assert_eq!(table_of(&message), 10_000);
        assert!(partition_matches(&message, p));
    }

    #[test]
    fn partition_filter_rejects_other_writers() {
        let mine = partition(100, 201);
        let net: IpNet = "10.0.0.0/24".parse().unwrap();

        let other_table = build_route_message(partition(101, 201), link(7), &net);
        let other_protocol = build_route_message(partition(100, 202), link(7), &net);

        assert!(!partition_matches(&other_table, mine));
        assert!(!partition_matches(&other_protocol, mine));
    }

    #[test]
    fn default_route_has_no_destination() {
        let message = RouteMessageBuilder::<std::net::Ipv4Addr>::new().build();
        assert_eq!(destination_of(&message), None);
    }

    #[test]
    fn host_prefix_lengths() {
        assert_eq!(
            host_prefix("192.0.2.1".parse().unwrap()).to_string(),
            "192.0.2.1/32"
        );
        assert_eq!(
            host_prefix("fd00::1".parse().unwrap()).to_string(),
            "fd00::1/128"
        );
    }
}
