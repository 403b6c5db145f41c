// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! An in-memory [`KernelRouter`] for exercising the reconcilers without a
//! kernel. Only for testing.

use ahash::AHashSet;
use ipnet::IpNet;
use net::interface::{AdminState, InterfaceIndex, InterfaceName};
use net::route::{AddressFamily, RouteTableId, RulePriority};
use route_manager::route::RoutePartition;
use route_manager::rule::PolicyRule;
use route_manager::vrf::{VrfDevice, VrfSpec};
use route_manager::{KernelError, KernelRouter, PrefixSet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug)]
struct FakeVrf {
    table_id: RouteTableId,
    index: InterfaceIndex,
    admin_state: AdminState,
}

#[derive(Debug, Default)]
struct State {
    vrfs: HashMap<InterfaceName, FakeVrf>,
    routes: HashMap<RoutePartition, PrefixSet>,
    rules: AHashSet<PolicyRule>,
    next_index: u32,
    writes: usize,
}

/// A fake kernel holding VRFs, partitioned routes, and rules in memory.
///
/// Counts every mutation in [`TestKernel::writes`], which is how tests
/// assert that a converged reconcile pass issues zero writes.
#[derive(Clone, Debug, Default)]
pub struct TestKernel {
    state: Arc<Mutex<State>>,
}

impl TestKernel {
    /// Build an empty fake kernel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-seed a VRF device, as if another process had created it.
    pub fn seed_vrf(&self, name: &InterfaceName, table_id: RouteTableId) {
        let mut state = self.lock();
        state.next_index += 1;
        let index = InterfaceIndex::try_new(state.next_index)
            .unwrap_or_else(|_| unreachable!("next_index starts at one"));
        state.vrfs.insert(
            name.clone(),
            FakeVrf {
                table_id,
                index,
                admin_state: AdminState::Up,
            },
        );
    }

    /// The number of mutations applied so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// The prefixes currently installed in `partition`.
    #[must_use]
    pub fn routes(&self, partition: RoutePartition) -> PrefixSet {
        self.lock().routes.get(&partition).cloned().unwrap_or_default()
    }

    /// The rules currently installed, at any priority.
    #[must_use]
    pub fn rules(&self) -> AHashSet<PolicyRule> {
        self.lock().rules.clone()
    }

    /// The names of the VRF devices currently present.
    #[must_use]
    pub fn vrf_names(&self) -> Vec<InterfaceName> {
        let mut names: Vec<_> = self.lock().vrfs.keys().cloned().collect();
        names.sort();
        names
    }
}

fn family_of(prefix: &str) -> Option<AddressFamily> {
    match prefix.parse::<IpNet>().ok()? {
        IpNet::V4(_) => Some(AddressFamily::Ipv4),
        IpNet::V6(_) => Some(AddressFamily::Ipv6),
    }
}

impl KernelRouter for TestKernel {
    async fn ensure_vrf(&self, spec: &VrfSpec) -> Result<InterfaceIndex, KernelError> {
        let mut state = self.lock();
        if let Some(vrf) = state.vrfs.get(&spec.name).cloned() {
            if vrf.table_id != spec.table_id {
                return Err(KernelError::VrfMismatch {
                    name: spec.name.clone(),
                    expected: spec.table_id,
                    found: vrf.table_id,
                });
            }
            if vrf.admin_state != AdminState::Up {
                state.writes += 1;
                if let Some(vrf) = state.vrfs.get_mut(&spec.name) {
                    vrf.admin_state = AdminState::Up;
                }
            }
            return Ok(vrf.index);
        }
        state.next_index += 1;
        state.writes += 1;
        let index = InterfaceIndex::try_new(state.next_index)
            .unwrap_or_else(|_| unreachable!("next_index starts at one"));
        state.vrfs.insert(
            spec.name.clone(),
            FakeVrf {
                table_id: spec.table_id,
                index,
                admin_state: AdminState::Up,
            },
        );
        Ok(index)
    }

    async fn delete_vrf(&self, name: &InterfaceName) -> Result<(), KernelError> {
        let mut state = self.lock();
        if state.vrfs.remove(name).is_some() {
            state.writes += 1;
        }
        Ok(())
    }

    async fn list_vrfs(&self) -> Result<Vec<VrfDevice>, KernelError> {
        let state = self.lock();
        let mut devices: Vec<_> = state
            .vrfs
            .iter()
            .map(|(name, vrf)| VrfDevice {
                name: name.clone(),
                table_id: vrf.table_id,
                index: vrf.index,
                admin_state: vrf.admin_state,
            })
            .collect();
        devices.sort();
        Ok(devices)
    }

    async fn replace_routes(
        &self,
        partition: RoutePartition,
        _link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        let mut state = self.lock();
        for prefix in prefixes.iter() {
            state.writes += 1;
            state
                .routes
                .entry(partition)
                .or_default()
                .add(prefix.to_string());
        }
        Ok(())
    }

    async fn delete_routes(
        &self,
        partition: RoutePartition,
        _link: InterfaceIndex,
        prefixes: &PrefixSet,
    ) -> Result<(), KernelError> {
        let mut state = self.lock();
        for prefix in prefixes.iter() {
            state.writes += 1;
            if let Some(routes) = state.routes.get_mut(&partition) {
                routes.del(prefix);
            }
        }
        Ok(())
    }

    async fn list_routes(
        &self,
        partition: RoutePartition,
        families: &[AddressFamily],
    ) -> Result<PrefixSet, KernelError> {
        let state = self.lock();
        let mut set = PrefixSet::new();
        if let Some(routes) = state.routes.get(&partition) {
            for prefix in routes.iter() {
                if family_of(prefix).is_some_and(|family| families.contains(&family)) {
                    set.add(prefix.to_string());
                }
            }
        }
        Ok(set)
    }

    async fn ensure_rule(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        let mut state = self.lock();
        if state.rules.insert(rule.clone()) {
            state.writes += 1;
        }
        Ok(())
    }

    async fn delete_rule(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        let mut state = self.lock();
        if state.rules.remove(rule) {
            state.writes += 1;
        }
        Ok(())
    }

    async fn list_rules(&self, priority: RulePriority) -> Result<AHashSet<PolicyRule>, KernelError> {
        let state = self.lock();
        Ok(state
            .rules
            .iter()
            .filter(|rule| rule.priority == priority)
            .cloned()
            .collect())
    }
}
