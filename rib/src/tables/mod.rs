// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The RIB/FIB row type and the table schemas built over it.

mod nexthop;
mod prefix;
mod protocol;

pub use nexthop::{NextHop, NextHopKind};
pub use prefix::Prefix;
pub use protocol::Protocol;

use crate::store::{IndexDef, Key, Query, Table, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The logical writer a RIB row belongs to.
///
/// Rows are only ever mutated (via delete + insert) by the owner that
/// created them.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Owner(String);

impl Owner {
    /// The binary index key of this owner.
    #[must_use]
    pub fn key(&self) -> Key {
        self.0.as_bytes().to_vec()
    }
}

impl From<&str> for Owner {
    fn from(value: &str) -> Self {
        Owner(value.to_string())
    }
}

impl From<String> for Owner {
    fn from(value: String) -> Self {
        Owner(value)
    }
}

impl AsRef<str> for Owner {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row in the RIB or FIB.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// The destination network.
    pub prefix: Prefix,
    /// How the destination is reached.
    pub next_hop: NextHop,
    /// The subsystem the route originates from.
    pub protocol: Protocol,
    /// The logical writer that owns the row.
    pub owner: Owner,
}

impl Route {
    /// The RIB identity of this route.
    #[must_use]
    pub fn id(&self) -> RouteId {
        RouteId {
            prefix: self.prefix.clone(),
            owner: self.owner.clone(),
        }
    }
}

/// The unique identity of a RIB row: one owner's candidate for one prefix.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct RouteId {
    /// The destination network.
    pub prefix: Prefix,
    /// The logical writer that owns the row.
    pub owner: Owner,
}

impl RouteId {
    /// The binary index key of this identity.
    #[must_use]
    pub fn key(&self) -> Key {
        let mut key = self.prefix.key();
        key.extend_from_slice(&self.owner.key());
        key
    }
}

/// The name of the primary index on both tables.
pub const ID_INDEX: &str = "id";
/// The name of the RIB's owner index.
pub const OWNER_INDEX: &str = "owner";
/// The name of the RIB's prefix index.
pub const PREFIX_INDEX: &str = "prefix";
/// The name of the FIB's next-hop kind index.
pub const NEXTHOP_KIND_INDEX: &str = "nexthop-kind";

fn route_id_key(route: &Route) -> Key {
    route.id().key()
}

fn route_owner_key(route: &Route) -> Key {
    route.owner.key()
}

fn route_prefix_key(route: &Route) -> Key {
    route.prefix.key()
}

fn route_nexthop_kind_key(route: &Route) -> Key {
    route.next_hop.kind().key()
}

/// Build the RIB: unique by `(prefix, owner)`, with owner and prefix
/// secondary indices.
#[must_use]
pub fn rib_table() -> Table {
    Table::new(TableSchema {
        name: "rib",
        primary: IndexDef {
            name: ID_INDEX,
            key_of: route_id_key,
        },
        secondary: &[
            IndexDef {
                name: OWNER_INDEX,
                key_of: route_owner_key,
            },
            IndexDef {
                name: PREFIX_INDEX,
                key_of: route_prefix_key,
            },
        ],
    })
}

/// Build the FIB: unique by prefix, with a next-hop kind secondary index
/// for datapath materialization.
#[must_use]
pub fn fib_table() -> Table {
    Table::new(TableSchema {
        name: "fib",
        primary: IndexDef {
            name: ID_INDEX,
            key_of: route_prefix_key,
        },
        secondary: &[IndexDef {
            name: NEXTHOP_KIND_INDEX,
            key_of: route_nexthop_kind_key,
        }],
    })
}

/// Query the RIB by a route's full identity.
#[must_use]
pub fn by_id(id: &RouteId) -> Query {
    Query::new(ID_INDEX, id.key())
}

/// Query the RIB by owner.
#[must_use]
pub fn by_owner(owner: &Owner) -> Query {
    Query::new(OWNER_INDEX, owner.key())
}

/// Query the RIB by prefix.
#[must_use]
pub fn by_prefix(prefix: &Prefix) -> Query {
    Query::new(PREFIX_INDEX, prefix.key())
}

/// Query the FIB by prefix (its primary key).
#[must_use]
pub fn fib_by_prefix(prefix: &Prefix) -> Query {
    Query::new(ID_INDEX, prefix.key())
}

/// Query the FIB by next-hop kind.
#[must_use]
pub fn by_nexthop_kind(kind: NextHopKind) -> Query {
    Query::new(NEXTHOP_KIND_INDEX, kind.key())
}
