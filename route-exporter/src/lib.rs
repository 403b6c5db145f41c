// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Route exporters: reconcile loops that converge the kernel's VRF
//! devices, protocol-owned routes, and policy routing rules toward
//! cluster intent.
//!
//! Each exporter owns one `{table, protocol}` partition (or, for the VRF
//! reconciler, the priority-999 rule space and the non-reserved VRF
//! names) and reconciliation is its only write path: every pass computes
//! the full desired state, observes the kernel through the partition
//! filters, and applies the difference.

#![deny(clippy::all, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::unsafe_derive_deserialize)] // multi-index-map generated code uses unsafe

pub mod cluster;
pub mod config;
mod errors;
pub mod launch;
pub mod lbvip;
pub mod podcidr;
pub mod testkernel;
pub mod vrf;

pub use errors::{ExporterError, LastError, LastErrorSlot};
