// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Data types for describing kernel route tables, route ownership, and
//! policy routing rules.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::num::{NonZero, TryFromIntError};

/// A numeric id for a kernel route table.
///
/// Any `NonZero<u32>` is valid.
/// This type exists only to provide "units".
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RouteTableId(NonZero<u32>);

impl RouteTableId {
    /// Treat this [`RouteTableId`] as a `u32`.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for RouteTableId {
    type Error = TryFromIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(RouteTableId(NonZero::try_from(value)?))
    }
}

impl From<RouteTableId> for u32 {
    fn from(value: RouteTableId) -> Self {
        value.0.into()
    }
}

impl Debug for RouteTableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for RouteTableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol ids below this value (`RTPROT_STATIC`) are reserved for the
/// kernel and its own route origins (redirect, kernel, boot).
pub const RTPROT_STATIC: u8 = 4;

/// The protocol id stamped on every route a writer installs.
///
/// The `{table, protocol}` pair scopes all reads and writes a route writer
/// performs, so reserved kernel ids are unrepresentable: construction
/// rejects ids below [`RTPROT_STATIC`] (which includes zero).
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(transparent)]
pub struct RouteProtocolId(u8);

/// Errors which may occur when validating a [`RouteProtocolId`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteProtocolIdError {
    /// The id is reserved for kernel internal use.
    #[error("protocol ids below {RTPROT_STATIC} are reserved for kernel internal use (got {0})")]
    Reserved(u8),
}

impl RouteProtocolId {
    /// Validate `raw` as a usable route protocol id.
    ///
    /// # Errors
    ///
    /// Returns an error for ids below [`RTPROT_STATIC`].
    pub fn try_new(raw: u8) -> Result<Self, RouteProtocolIdError> {
        if raw < RTPROT_STATIC {
            return Err(RouteProtocolIdError::Reserved(raw));
        }
        Ok(RouteProtocolId(raw))
    }

    /// Treat this [`RouteProtocolId`] as a `u8`.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RouteProtocolId {
    type Error = RouteProtocolIdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RouteProtocolId::try_new(value)
    }
}

impl From<RouteProtocolId> for u8 {
    fn from(value: RouteProtocolId) -> Self {
        value.0
    }
}

impl Debug for RouteProtocolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for RouteProtocolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The address families a route listing may span.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 (`AF_INET`).
    Ipv4,
    /// IPv6 (`AF_INET6`).
    Ipv6,
}

/// The priority of a policy routing rule.
///
/// Any `NonZero<u32>` is valid; zero is the kernel's "unset" marker and is
/// never a managed priority.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RulePriority(NonZero<u32>);

impl RulePriority {
    /// Treat the provided `NonZero<u32>` as a [`RulePriority`].
    #[must_use]
    pub const fn from_nonzero(raw: NonZero<u32>) -> Self {
        RulePriority(raw)
    }

    /// Treat this [`RulePriority`] as a `u32`.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for RulePriority {
    type Error = TryFromIntError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(RulePriority(NonZero::try_from(value)?))
    }
}

impl From<RulePriority> for u32 {
    fn from(value: RulePriority) -> Self {
        value.0.into()
    }
}

impl Debug for RulePriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for RulePriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::route::{AddressFamily, RouteProtocolId, RouteTableId, RulePriority, RTPROT_STATIC};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for RouteTableId {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self(driver.produce()?))
        }
    }

    impl TypeGenerator for RouteProtocolId {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            let raw = driver.produce::<u8>()?;
            Some(Self(raw.max(RTPROT_STATIC)))
        }
    }

    impl TypeGenerator for RulePriority {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self(driver.produce()?))
        }
    }

    impl TypeGenerator for AddressFamily {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(if driver.produce::<bool>()? {
                AddressFamily::Ipv4
            } else {
                AddressFamily::Ipv6
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn table_id_rejects_zero() {
        assert!(RouteTableId::try_from(0).is_err());
        assert_eq!(RouteTableId::try_from(254).unwrap().to_u32(), 254);
    }

    #[test]
    fn protocol_id_rejects_reserved_range() {
        for raw in 0..RTPROT_STATIC {
            assert_eq!(
                RouteProtocolId::try_new(raw),
                Err(RouteProtocolIdError::Reserved(raw))
            );
        }
        assert_eq!(RouteProtocolId::try_new(201).unwrap().to_u8(), 201);
    }
}
