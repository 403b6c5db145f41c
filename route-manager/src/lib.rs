// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconcile the intended state of the linux routing stack (VRF devices,
//! protocol-owned routes, policy routing rules) with its observed state.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::unsafe_derive_deserialize)] // multi-index-map generated code uses unsafe

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

mod errors;
pub mod netns;
mod prefix_set;
pub mod route;
pub mod rule;
pub mod vrf;

pub use errors::KernelError;
pub use prefix_set::PrefixSet;

use crate::route::RoutePartition;
use crate::rule::PolicyRule;
use crate::vrf::{VrfDevice, VrfSpec};
use ahash::AHashSet;
use net::interface::{InterfaceIndex, InterfaceName};
use net::route::{AddressFamily, RulePriority};
use rtnetlink::Handle;

/// `Manager` is the primary entry point to kernel routing reconciliation
/// logic.
///
/// It is a newtype wrapper around a netlink handle, with a `PhantomData<R>`
/// used to allow multiple implementations of the `rekon` traits (based on
/// the type `R`) which we are reconciling.
#[derive(Clone, Debug)]
pub struct Manager<R: ?Sized> {
    handle: Arc<Handle>,
    _marker: PhantomData<R>,
}

impl<R> Manager<R> {
    /// Create a new `Manager` from an [`Arc<Handle>`].
    #[must_use]
    pub fn new(handle: Arc<Handle>) -> Self {
        Manager {
            handle,
            _marker: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Convenience method for reducing syntactic noise when creating ephemeral
/// `Manager` structs.
pub fn manager_of<T>(other: impl Into<Manager<T>>) -> Manager<T> {
    other.into()
}

impl<T, U> From<&Manager<T>> for Manager<U> {
    fn from(handle: &Manager<T>) -> Self {
        Self::new(handle.handle.clone())
    }
}

/// Marker type for the full kernel routing surface managed by this crate.
#[derive(Clone, Copy, Debug)]
pub struct Kernel;

/// The kernel router surface the route exporters reconcile against.
///
/// Every read and write is scoped: routes by `{table, protocol}`
/// ([`RoutePartition`]), rules by priority, VRF devices by name. The
/// netlink-backed implementation lives on [`Manager<Kernel>`]; tests use an
/// in-memory implementation.
pub trait KernelRouter {
    /// Make sure a VRF device exists per `spec`, is administratively up,
    /// and return its interface index.
    ///
    /// A link with the requested name that is not a VRF, or a VRF bound to
    /// a different table, is an invariant violation and is never corrected.
    fn ensure_vrf(
        &self,
        spec: &VrfSpec,
    ) -> impl Future<Output = Result<InterfaceIndex, KernelError>> + Send;

    /// Delete the VRF device with the given name. Absence is success.
    fn delete_vrf(
        &self,
        name: &InterfaceName,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;

    /// List every VRF device present in the kernel.
    fn list_vrfs(&self) -> impl Future<Output = Result<Vec<VrfDevice>, KernelError>> + Send;

    /// Replace-or-insert a route to every prefix in `prefixes`, stamped
    /// with the partition's table and protocol and leaving via `link`.
    fn replace_routes(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;

    /// Delete the routes to every prefix in `prefixes` within the
    /// partition. Routes already gone are not an error.
    fn delete_routes(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> impl Future<Output = Result<(), KernelError>> + Send;

    /// List the destination prefixes of every route in the partition
    /// across the requested address families. Routes without a
    /// destination (default routes) are skipped.
    fn list_routes(
        &self,
        partition: RoutePartition,
        families: &[AddressFamily],
    ) -> impl Future<Output = Result<PrefixSet, KernelError>> + Send;

    /// Install a policy routing rule. An identical rule already present is
    /// not an error.
    fn ensure_rule(&self, rule: &PolicyRule)
    -> impl Future<Output = Result<(), KernelError>> + Send;

    /// Delete a policy routing rule. Absence is success.
    fn delete_rule(&self, rule: &PolicyRule)
    -> impl Future<Output = Result<(), KernelError>> + Send;

    /// List every rule installed at the given priority.
    fn list_rules(
        &self,
        priority: RulePriority,
    ) -> impl Future<Output = Result<AHashSet<PolicyRule>, KernelError>> + Send;
}

impl KernelRouter for Manager<Kernel> {
    async fn ensure_vrf(&self, spec: &VrfSpec) -> Result<InterfaceIndex, KernelError> {
        manager_of::<VrfDevice>(self).ensure(spec).await
    }

    async fn delete_vrf(&self, name: &InterfaceName) -> Result<(), KernelError> {
        manager_of::<VrfDevice>(self).delete(name).await
    }

    async fn list_vrfs(&self) -> Result<Vec<VrfDevice>, KernelError> {
        manager_of::<VrfDevice>(self).list().await
    }

    async fn replace_routes(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        manager_of::<RoutePartition>(self)
            .replace(partition, link, prefixes)
            .await
    }

    async fn delete_routes(
        &self,
        partition: RoutePartition,
        link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        manager_of::<RoutePartition>(self)
            .remove(partition, link, prefixes)
            .await
    }

    async fn list_routes(
        &self,
        partition: RoutePartition,
        families: &[AddressFamily],
    ) -> Result<PrefixSet, KernelError> {
        manager_of::<RoutePartition>(self)
            .list(partition, families)
            .await
    }

    async fn ensure_rule(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        manager_of::<PolicyRule>(self).ensure(rule).await
    }

    async fn delete_rule(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        manager_of::<PolicyRule>(self).delete(rule).await
    }

    async fn list_rules(&self, priority: RulePriority) -> Result<AHashSet<PolicyRule>, KernelError> {
        manager_of::<PolicyRule>(self).list(priority).await
    }
}
