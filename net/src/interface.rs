// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Data types for describing network interfaces.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::num::NonZero;

/// The maximum length (in bytes) of a linux network interface name.
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// A validated linux network interface name.
///
/// Interface names are 1 to 15 bytes long and may not contain `/`,
/// whitespace, or control characters. `.` and `..` are reserved by sysfs
/// and rejected as well.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

/// Errors which may occur when validating an [`InterfaceName`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InterfaceNameError {
    /// The name was empty.
    #[error("interface name must not be empty")]
    Empty,
    /// The name was longer than [`MAX_INTERFACE_NAME_LEN`] bytes.
    #[error("interface name {0} is longer than {MAX_INTERFACE_NAME_LEN} bytes")]
    TooLong(String),
    /// The name contained an illegal character.
    #[error("interface name {0} contains an illegal character")]
    IllegalCharacter(String),
    /// The name is reserved by the kernel / sysfs.
    #[error("interface name {0} is reserved")]
    Reserved(String),
}

impl InterfaceName {
    /// Validate `name` as a linux interface name.
    ///
    /// # Errors
    ///
    /// Returns an [`InterfaceNameError`] describing the first violated rule.
    pub fn try_new(name: impl Into<String>) -> Result<Self, InterfaceNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InterfaceNameError::Empty);
        }
        if name.len() > MAX_INTERFACE_NAME_LEN {
            return Err(InterfaceNameError::TooLong(name));
        }
        if name == "." || name == ".." {
            return Err(InterfaceNameError::Reserved(name));
        }
        if name
            .chars()
            .any(|c| c == '/' || c.is_whitespace() || c.is_control())
        {
            return Err(InterfaceNameError::IllegalCharacter(name));
        }
        Ok(InterfaceName(name))
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = InterfaceNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::try_new(value)
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = InterfaceNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        InterfaceName::try_new(value)
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <_ as Debug>::fmt(&self.0, f)
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <_ as Display>::fmt(&self.0, f)
    }
}

/// A network interface id (also known as ifindex in linux).
///
/// Assigned by the kernel; never zero, and not meaningful between machines
/// or across reboots.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct InterfaceIndex(NonZero<u32>);

/// Errors which may occur when validating an [`InterfaceIndex`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InterfaceIndexError {
    /// The provided value was zero.
    #[error("interface index must not be zero")]
    Zero,
}

impl InterfaceIndex {
    /// Treat the provided `NonZero<u32>` as an [`InterfaceIndex`].
    #[must_use]
    pub fn new(raw: NonZero<u32>) -> InterfaceIndex {
        InterfaceIndex(raw)
    }

    /// Treat the provided `u32` as an [`InterfaceIndex`].
    ///
    /// # Errors
    ///
    /// Returns an error if the provided value is zero.
    pub fn try_new(raw: u32) -> Result<Self, InterfaceIndexError> {
        raw.try_into()
    }

    /// Treat this [`InterfaceIndex`] as a `u32`.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for InterfaceIndex {
    type Error = InterfaceIndexError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match NonZero::new(value) {
            Some(raw) => Ok(InterfaceIndex::new(raw)),
            None => Err(InterfaceIndexError::Zero),
        }
    }
}

impl From<InterfaceIndex> for u32 {
    fn from(value: InterfaceIndex) -> Self {
        value.to_u32()
    }
}

impl Debug for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <_ as Debug>::fmt(&self.0, f)
    }
}

impl Display for InterfaceIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <_ as Display>::fmt(&self.0, f)
    }
}

/// The administrative state of a network interface.
///
/// This describes whether the interface _should_ pass traffic; it says
/// nothing about the operational (carrier) state.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum AdminState {
    /// The interface is administratively disabled.
    Down,
    /// The interface is administratively enabled.
    Up,
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::interface::{AdminState, InterfaceIndex, InterfaceName};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for InterfaceIndex {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Self(driver.produce()?))
        }
    }

    impl TypeGenerator for AdminState {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(if driver.produce::<bool>()? {
                AdminState::Up
            } else {
                AdminState::Down
            })
        }
    }

    impl TypeGenerator for InterfaceName {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            let len = 1 + driver.produce::<usize>()? % super::MAX_INTERFACE_NAME_LEN;
            let mut name = String::with_capacity(len);
            for _ in 0..len {
                let c = char::from(b'a' + (driver.produce::<u8>()? % 26));
                name.push(c);
            }
            InterfaceName::try_new(name).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn interface_name_accepts_typical_names() {
        for name in ["lo", "eth0", "vrf-pod", "br0.100"] {
            InterfaceName::try_new(name).unwrap();
        }
    }

    #[test]
    fn interface_name_rejects_bad_names() {
        assert_eq!(
            InterfaceName::try_new(""),
            Err(InterfaceNameError::Empty)
        );
        assert!(matches!(
            InterfaceName::try_new("name-that-is-way-too-long"),
            Err(InterfaceNameError::TooLong(_))
        ));
        assert!(matches!(
            InterfaceName::try_new("has space"),
            Err(InterfaceNameError::IllegalCharacter(_))
        ));
        assert!(matches!(
            InterfaceName::try_new("a/b"),
            Err(InterfaceNameError::IllegalCharacter(_))
        ));
        assert!(matches!(
            InterfaceName::try_new(".."),
            Err(InterfaceNameError::Reserved(_))
        ));
    }

    #[test]
    fn interface_index_rejects_zero() {
        assert_eq!(InterfaceIndex::try_new(0), Err(InterfaceIndexError::Zero));
        assert_eq!(InterfaceIndex::try_new(7).unwrap().to_u32(), 7);
    }
}
