// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The VRF+rule reconciler: converges the kernel's VRF devices and
//! priority-999 policy rules toward the cluster's VRF bindings.

use crate::cluster::{EndpointInventory, VrfBinding, VrfBindingLister};
use crate::errors::{ExporterError, LastError, LastErrorSlot, last_error_channel};
use ahash::AHashSet;
use ipnet::{IpNet, Ipv4Net};
use net::interface::InterfaceName;
use net::route::RulePriority;
use route_manager::KernelRouter;
use route_manager::rule::PolicyRule;
use route_manager::vrf::{MultiIndexVrfSpecMap, VrfSpec};
use std::num::NonZero;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};

/// The fixed priority of every rule this reconciler manages.
pub const RULE_PRIORITY: RulePriority = match NonZero::new(999) {
    Some(raw) => RulePriority::from_nonzero(raw),
    None => unreachable!(),
};

/// The VRF devices the bindings ask for, keyed by name.
fn desired_vrfs(bindings: &[VrfBinding]) -> MultiIndexVrfSpecMap {
    let mut desired = MultiIndexVrfSpecMap::default();
    for binding in bindings {
        let spec = VrfSpec {
            name: binding.name.clone(),
            table_id: binding.table_id,
        };
        if let Err(uniqueness_error) = desired.try_insert(spec) {
            warn!("conflicting VRF bindings: {uniqueness_error:?}");
        }
    }
    desired
}

/// The rules the bindings ask for: for every binding, every selected
/// local pod crossed with every destination CIDR, at [`RULE_PRIORITY`].
fn desired_rules(
    bindings: &[VrfBinding],
    endpoints: &dyn EndpointInventory,
) -> AHashSet<PolicyRule> {
    let mut rules = AHashSet::new();
    let endpoints = endpoints.endpoints();
    for binding in bindings {
        for endpoint in &endpoints {
            if !binding.pod_selector.matches(&endpoint.labels) {
                continue;
            }
            let Some(ipv4) = endpoint.ipv4 else {
                continue;
            };
            let src = IpNet::V4(Ipv4Net::new_assert(ipv4, 32));
            for destination in &binding.destination_cidrs {
                if !matches!(destination, IpNet::V4(_)) {
                    // pod sources are IPv4; a mixed-family rule is
                    // unrepresentable
                    warn!(
                        "skipping non-IPv4 destination {destination} of VRF binding {name}",
                        name = binding.name
                    );
                    continue;
                }
                rules.insert(PolicyRule {
                    src,
                    dst: destination.trunc(),
                    table: binding.table_id,
                    priority: RULE_PRIORITY,
                });
            }
        }
    }
    rules
}

/// Reconciles VRF devices and policy rules for workload VRF bindings.
///
/// Owns every VRF name except the reserved ones (the other exporters'
/// VRFs) and every rule at [`RULE_PRIORITY`].
pub struct VrfReconciler<K> {
    kernel: K,
    bindings: Arc<dyn VrfBindingLister>,
    endpoints: Arc<dyn EndpointInventory>,
    reserved: Vec<InterfaceName>,
    pass: Mutex<()>,
    last_error: LastErrorSlot,
}

impl<K: KernelRouter> VrfReconciler<K> {
    /// Build the reconciler and the observable for its most recent
    /// failure. `reserved` names every VRF owned by another exporter;
    /// this reconciler will never touch them.
    #[must_use]
    pub fn new(
        kernel: K,
        bindings: Arc<dyn VrfBindingLister>,
        endpoints: Arc<dyn EndpointInventory>,
        reserved: Vec<InterfaceName>,
    ) -> (Self, LastError) {
        let (slot, observer) = last_error_channel();
        (
            VrfReconciler {
                kernel,
                bindings,
                endpoints,
                reserved,
                pass: Mutex::new(()),
                last_error: slot,
            },
            observer,
        )
    }

    /// Run one full reconcile pass, parking any failure in the
    /// `last_error` slot. Passes serialize: overlapping events never race
    /// the kernel listing.
    pub async fn reconcile(&self) {
        let _serialized = self.pass.lock().await;
        let outcome = self.sync().await;
        if let Err(err) = &outcome {
            warn!("VRF reconcile failed: {err}");
        }
        self.last_error.record(outcome);
    }

    async fn sync(&self) -> Result<(), ExporterError> {
        let bindings = self.bindings.list();
        let desired = desired_vrfs(&bindings);

        // never consider the other exporters' VRFs for deletion
        let observed: Vec<_> = self
            .kernel
            .list_vrfs()
            .await?
            .into_iter()
            .filter(|device| !self.reserved.contains(&device.name))
            .collect();

        for (_, spec) in desired.iter() {
            self.kernel.ensure_vrf(spec).await?;
        }
        for device in &observed {
            if desired.get_by_name(&device.name).is_none() {
                debug!("VRF {name} is no longer bound; deleting", name = device.name);
                self.kernel.delete_vrf(&device.name).await?;
            }
        }

        let desired = desired_rules(&bindings, self.endpoints.as_ref());
        let current = self.kernel.list_rules(RULE_PRIORITY).await?;
        for rule in desired.difference(&current) {
            self.kernel.ensure_rule(rule).await?;
        }
        for rule in current.difference(&desired) {
            self.kernel.delete_rule(rule).await?;
        }
        Ok(())
    }

    /// Drain binding/endpoint change kicks until `shutdown` fires, one
    /// full pass per delivery.
    pub async fn run(self, mut kicks: mpsc::Receiver<()>, mut shutdown: watch::Receiver<()>) {
        loop {
            tokio::select! {
                maybe = kicks.recv() => {
                    if maybe.is_none() {
                        debug!("VRF kick stream closed; reconciler stopping");
                        return;
                    }
                    self.reconcile().await;
                }
                _ = shutdown.changed() => {
                    debug!("VRF reconciler stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::{RULE_PRIORITY, desired_rules, desired_vrfs};
    use crate::cluster::{EndpointInventory, LocalEndpoint, PodSelector, VrfBinding};
    use std::collections::BTreeMap;

    struct FixedEndpoints(Vec<LocalEndpoint>);

    impl EndpointInventory for FixedEndpoints {
        fn endpoints(&self) -> Vec<LocalEndpoint> {
            self.0.clone()
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn binding(name: &str, table: u32, selector: PodSelector, dsts: &[&str]) -> VrfBinding {
        VrfBinding {
            name: name.try_into().unwrap(),
            table_id: table.try_into().unwrap(),
            pod_selector: selector,
            destination_cidrs: dsts.iter().map(|d| d.parse().unwrap()).collect(),
        }
    }

    #[test]
    fn bindings_map_to_vrf_specs_by_name() {
        let bindings = [
            binding("vrf-a", 100, PodSelector::default(), &["10.1.0.0/16"]),
            binding("vrf-b", 101, PodSelector::default(), &["10.2.0.0/16"]),
        ];
        let desired = desired_vrfs(&bindings);
        assert_eq!(desired.len(), 2);
        assert_eq!(
            desired
                .get_by_name(&"vrf-a".try_into().unwrap())
                .unwrap()
                .table_id
                .to_u32(),
            100
        );
    }

    #[test]
    fn rules_are_the_selected_pod_destination_product() {
        let selector_web = PodSelector {
            match_labels: labels(&[("app", "web")]),
            match_expressions: vec![],
        };
        let bindings = [
            binding("vrf-a", 100, selector_web, &["10.1.0.0/16"]),
            binding("vrf-b", 101, PodSelector::default(), &["10.2.0.0/16"]),
        ];
        let endpoints = FixedEndpoints(vec![
            LocalEndpoint {
                labels: labels(&[("app", "web")]),
                ipv4: Some("192.168.1.10".parse().unwrap()),
            },
            LocalEndpoint {
                labels: labels(&[("app", "db")]),
                ipv4: Some("192.168.1.20".parse().unwrap()),
            },
            LocalEndpoint {
                labels: labels(&[("app", "web")]),
                ipv4: None, // no address yet: nothing to steer
            },
        ]);

        let rules = desired_rules(&bindings, &endpoints);
        let rendered: std::collections::BTreeSet<String> =
            rules.iter().map(ToString::to_string).collect();
        let expected: std::collections::BTreeSet<String> = [
            "from 192.168.1.10/32 to 10.1.0.0/16 lookup 100 pref 999",
            "from 192.168.1.10/32 to 10.2.0.0/16 lookup 101 pref 999",
            "from 192.168.1.20/32 to 10.2.0.0/16 lookup 101 pref 999",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(rendered, expected);
        assert!(rules.iter().all(|rule| rule.priority == RULE_PRIORITY));
    }

    #[test]
    fn non_ipv4_destinations_are_skipped() {
        let bindings = [binding(
            "vrf-a",
            100,
            PodSelector::default(),
            &["fd00::/64", "10.1.0.0/16"],
        )];
        let endpoints = FixedEndpoints(vec![LocalEndpoint {
            labels: BTreeMap::new(),
            ipv4: Some("192.168.1.10".parse().unwrap()),
        }]);
        let rules = desired_rules(&bindings, &endpoints);
        assert_eq!(rules.len(), 1);
        assert!(rules.iter().all(|rule| rule.dst.to_string() == "10.1.0.0/16"));
    }
}
