// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use net::interface::InterfaceName;
use net::route::RouteTableId;
use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the kernel router adapter.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A netlink request failed.
    #[error(transparent)]
    Netlink(#[from] rtnetlink::Error),

    /// A link with the requested name exists but is bound to another table.
    #[error("VRF {name} is bound to table {found}, expected table {expected}")]
    VrfMismatch {
        /// The name of the conflicting link.
        name: InterfaceName,
        /// The table the configuration asked for.
        expected: RouteTableId,
        /// The table the kernel device is actually bound to.
        found: RouteTableId,
    },

    /// A link with the requested name exists but is not a VRF.
    #[error("link {0} exists but is not a VRF")]
    NotAVrf(InterfaceName),

    /// A VRF disappeared between creation and the follow-up lookup.
    #[error("VRF {0} disappeared while being reconciled")]
    Vanished(InterfaceName),

    /// A prefix string did not parse as a CIDR.
    #[error("prefix {0} is not a valid CIDR")]
    InvalidPrefix(String),
}

impl KernelError {
    /// The errno carried by a netlink-level failure, if any.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            KernelError::Netlink(rtnetlink::Error::NetlinkError(message)) => {
                Some(Errno::from_raw(-message.raw_code()))
            }
            _ => None,
        }
    }

    /// True when the kernel reported that the object addressed by the
    /// request does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.errno(),
            Some(Errno::ESRCH | Errno::ENODEV | Errno::ENOENT)
        )
    }

    /// True when the kernel reported that the object being created already
    /// exists.
    #[must_use]
    pub fn is_already_present(&self) -> bool {
        matches!(self.errno(), Some(Errno::EEXIST))
    }
}
