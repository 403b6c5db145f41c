// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Priority-scoped policy routing rule manipulation.
//!
//! Rules are identified by their full `{src, dst, table, priority}` tuple.
//! Listing filters on priority alone; everything at a foreign priority is
//! invisible to this module.

use crate::{KernelError, Manager};
use ahash::AHashSet;
use futures::TryStreamExt;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use net::route::{AddressFamily, RouteTableId, RulePriority};
use rtnetlink::IpVersion;
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::debug;

/// A policy routing rule steering selected sources into a route table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The source CIDR the rule selects.
    pub src: IpNet,
    /// The destination CIDR the rule selects.
    pub dst: IpNet,
    /// The route table matching packets consult.
    pub table: RouteTableId,
    /// The rule's priority.
    pub priority: RulePriority,
}

impl PolicyRule {
    /// The address family of this rule (src and dst always agree).
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        match self.src {
            IpNet::V4(_) => AddressFamily::Ipv4,
            IpNet::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl Display for PolicyRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "from {src} to {dst} lookup {table} pref {priority}",
            src = self.src,
            dst = self.dst,
            table = self.table,
            priority = self.priority
        )
    }
}

/// Decode a netlink rule message into the managed tuple form.
///
/// Rules missing any member of the tuple (no source, no table, unset
/// priority) are not managed by this subsystem and decode to `None`.
pub(crate) fn decode_rule(message: &RuleMessage) -> Option<PolicyRule> {
    let mut src = None;
    let mut dst = None;
    let mut table = u32::from(message.header.table);
    let mut priority = 0u32;
    for attribute in &message.attributes {
        match attribute {
            RuleAttribute::Source(addr) => {
                src = ip_net(*addr, message.header.src_len);
            }
            RuleAttribute::Destination(addr) => {
                dst = ip_net(*addr, message.header.dst_len);
            }
            RuleAttribute::Table(id) => table = *id,
            RuleAttribute::Priority(value) => priority = *value,
            _ => {}
        }
    }
    Some(PolicyRule {
        src: src?,
        dst: dst?,
        table: RouteTableId::try_from(table).ok()?,
        priority: RulePriority::try_from(priority).ok()?,
    })
}

fn ip_net(addr: std::net::IpAddr, prefix_len: u8) -> Option<IpNet> {
    let net = match addr {
        std::net::IpAddr::V4(v4) => IpNet::V4(Ipv4Net::new(v4, prefix_len).ok()?),
        std::net::IpAddr::V6(v6) => IpNet::V6(Ipv6Net::new(v6, prefix_len).ok()?),
    };
    Some(net.trunc())
}

impl Manager<PolicyRule> {
    /// Install `rule`. An identical rule already present is success.
    pub async fn ensure(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        debug!("adding rule {rule}");
        let outcome = match (rule.src, rule.dst) {
            (IpNet::V4(src), IpNet::V4(dst)) => {
                self.handle()
                    .rule()
                    .add()
                    .v4()
                    .source_prefix(src.addr(), src.prefix_len())
                    .destination_prefix(dst.addr(), dst.prefix_len())
                    .table_id(rule.table.to_u32())
                    .priority(rule.priority.to_u32())
                    .action(RuleAction::ToTable)
                    .execute()
                    .await
            }
            (IpNet::V6(src), IpNet::V6(dst)) => {
                self.handle()
                    .rule()
                    .add()
                    .v6()
                    .source_prefix(src.addr(), src.prefix_len())
                    .destination_prefix(dst.addr(), dst.prefix_len())
                    .table_id(rule.table.to_u32())
                    .priority(rule.priority.to_u32())
                    .action(RuleAction::ToTable)
                    .execute()
                    .await
            }
            _ => unreachable!("PolicyRule invariant: src and dst share a family"),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = KernelError::from(err);
                if err.is_already_present() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Delete `rule`. Absence is success.
    pub async fn delete(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        debug!("deleting rule {rule}");
        let version = match rule.family() {
            AddressFamily::Ipv4 => IpVersion::V4,
            AddressFamily::Ipv6 => IpVersion::V6,
        };
        let mut request = self.handle().rule().get(version).execute();
        while let Some(message) = request.try_next().await? {
            if decode_rule(&message).as_ref() == Some(rule) {
                match self.handle().rule().del(message).execute().await {
                    Ok(()) => {}
                    Err(err) => {
                        let err = KernelError::from(err);
                        if !err.is_not_found() {
                            return Err(err);
                        }
                    }
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// List every rule installed at `priority` across both address
    /// families.
    pub async fn list(&self, priority: RulePriority) -> Result<AHashSet<PolicyRule>, KernelError> {
        let mut rules = AHashSet::new();
        for version in [IpVersion::V4, IpVersion::V6] {
            let mut request = self.handle().rule().get(version).execute();
            while let Some(message) = request.try_next().await? {
                if let Some(rule) = decode_rule(&message) {
                    if rule.priority == priority {
                        rules.insert(rule);
                    }
                }
            }
        }
        Ok(rules)
    }
}
