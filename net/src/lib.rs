// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Leaf data types for describing kernel routing objects.

#![deny(unsafe_code, missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod interface;
pub mod route;
