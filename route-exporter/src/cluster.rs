// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Boundary contracts with the cluster: the object shapes the upstream
//! watchers deliver and the synchronous inventories the reconcilers
//! query. The watchers themselves (API client, informers, node-name
//! resolution) live outside this workspace.

use ipnet::IpNet;
use net::interface::InterfaceName;
use net::route::RouteTableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// The slice of a node object the pod-CIDR exporter consumes.
///
/// Delivered on node add/update; node deletions are ignored upstream.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// The node's singular pod CIDR, if set.
    pub pod_cidr: Option<String>,
    /// The node's pod CIDR list. Preferred over the singular field when
    /// non-empty.
    pub pod_cidrs: Vec<String>,
}

/// The service types a cluster service can have.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ServiceType {
    /// A cluster-internal virtual IP.
    ClusterIp,
    /// A node-port service.
    NodePort,
    /// A service backed by a load balancer with ingress IPs.
    LoadBalancer,
    /// A DNS-name service.
    ExternalName,
}

/// The slice of a service object the LB-VIP exporter consumes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// The service type; only `LoadBalancer` services export VIPs.
    pub service_type: ServiceType,
    /// The ingress IPs assigned by the load balancer.
    pub ingress_ips: Vec<std::net::IpAddr>,
}

/// A cluster object claiming a VRF for a set of workloads.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VrfBinding {
    /// The VRF device name.
    pub name: InterfaceName,
    /// The route table the VRF binds to.
    pub table_id: RouteTableId,
    /// Selects the local pods whose traffic enters the VRF.
    pub pod_selector: PodSelector,
    /// The destinations steered into the VRF's table.
    pub destination_cidrs: Vec<IpNet>,
}

/// The operator of a [`SelectorRequirement`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// The label's value must be one of the listed values.
    In,
    /// The label must be absent or its value outside the listed values.
    NotIn,
    /// The label must be present, any value.
    Exists,
    /// The label must be absent.
    DoesNotExist,
}

/// One expression of a label selector.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    /// The label key the expression applies to.
    pub key: String,
    /// The operator relating the key to the values.
    pub operator: SelectorOperator,
    /// The values the operator compares against (empty for `Exists` and
    /// `DoesNotExist`).
    pub values: Vec<String>,
}

/// A label selector over pods. An empty selector matches every pod.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PodSelector {
    /// Labels that must be present with exactly these values.
    pub match_labels: BTreeMap<String, String>,
    /// Expression-form requirements, all of which must hold.
    pub match_expressions: Vec<SelectorRequirement>,
}

impl PodSelector {
    /// True when a pod carrying `labels` is selected.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        for requirement in &self.match_expressions {
            let value = labels.get(&requirement.key);
            let holds = match requirement.operator {
                SelectorOperator::In => {
                    value.is_some_and(|value| requirement.values.contains(value))
                }
                SelectorOperator::NotIn => {
                    value.is_none_or(|value| !requirement.values.contains(value))
                }
                SelectorOperator::Exists => value.is_some(),
                SelectorOperator::DoesNotExist => value.is_none(),
            };
            if !holds {
                return false;
            }
        }
        true
    }
}

/// A pod running on this node, as the endpoint inventory reports it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LocalEndpoint {
    /// The pod's labels.
    pub labels: BTreeMap<String, String>,
    /// The pod's IPv4 address, if it has one.
    pub ipv4: Option<std::net::Ipv4Addr>,
}

/// Synchronous query over the current set of cluster services.
pub trait ServiceLister: Send + Sync {
    /// The current services.
    fn list(&self) -> Vec<Service>;
}

/// Synchronous query over the current set of VRF bindings.
pub trait VrfBindingLister: Send + Sync {
    /// The current bindings.
    fn list(&self) -> Vec<VrfBinding>;
}

/// Synchronous query over the pods local to this node.
pub trait EndpointInventory: Send + Sync {
    /// The current local pods.
    fn endpoints(&self) -> Vec<LocalEndpoint>;
}

/// The sending side of a coalescing change-notification channel.
///
/// Watcher callbacks call [`Kick::kick`] on every add/update/delete; the
/// capacity-one channel collapses bursts, and the reconciler runs one
/// full pass per delivery.
#[derive(Clone, Debug)]
pub struct Kick(mpsc::Sender<()>);

impl Kick {
    /// Request a reconcile pass. Never blocks: a pass already pending
    /// covers this kick too.
    pub fn kick(&self) {
        let _ = self.0.try_send(());
    }
}

/// Build a coalescing kick channel.
#[must_use]
pub fn kick_channel() -> (Kick, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (Kick(tx), rx)
}
