// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The pod-CIDR exporter: keeps one kernel partition equal to the local
//! node's pod CIDRs.

use crate::cluster::NodeSpec;
use crate::config::ExportTarget;
use crate::errors::{ExporterError, LastError, LastErrorSlot, last_error_channel};
use ipnet::IpNet;
use net::route::AddressFamily;
use route_manager::{KernelRouter, PrefixSet};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// The pod CIDRs a node event asks us to export, canonicalized.
///
/// The plural list wins when non-empty; otherwise the singular field is
/// used if set.
fn desired_pod_prefixes(node: &NodeSpec) -> Result<PrefixSet, ExporterError> {
    let cidrs: Vec<&String> = if node.pod_cidrs.is_empty() {
        node.pod_cidr.iter().collect()
    } else {
        node.pod_cidrs.iter().collect()
    };
    let mut set = PrefixSet::new();
    for cidr in cidrs {
        let net: IpNet = cidr
            .parse()
            .map_err(|_| ExporterError::InvalidPodCidr(cidr.clone()))?;
        set.add(net.trunc().to_string());
    }
    Ok(set)
}

/// Reconciles the node's pod CIDRs into one `{table, protocol}` kernel
/// partition through one VRF device.
pub struct PodCidrExporter<K> {
    kernel: K,
    target: ExportTarget,
    families: Vec<AddressFamily>,
    last_error: LastErrorSlot,
}

impl<K: KernelRouter> PodCidrExporter<K> {
    /// Build the exporter and the observable for its most recent failure.
    #[must_use]
    pub fn new(
        kernel: K,
        target: ExportTarget,
        families: Vec<AddressFamily>,
    ) -> (Self, LastError) {
        let (slot, observer) = last_error_channel();
        (
            PodCidrExporter {
                kernel,
                target,
                families,
                last_error: slot,
            },
            observer,
        )
    }

    /// Run one full reconcile pass for `node`, parking any failure in the
    /// `last_error` slot. Never retries synchronously: the next event
    /// converges.
    pub async fn reconcile(&self, node: &NodeSpec) {
        let outcome = self.sync(node).await;
        if let Err(err) = &outcome {
            warn!(
                "pod-CIDR reconcile failed ({partition}): {err}",
                partition = self.target.partition
            );
        }
        self.last_error.record(outcome);
    }

    async fn sync(&self, node: &NodeSpec) -> Result<(), ExporterError> {
        let desired = desired_pod_prefixes(node)?;
        let current = self
            .kernel
            .list_routes(self.target.partition, &self.families)
            .await?;
        let (add, del) = desired.distance(&current);
        debug!(
            "pod-CIDR pass ({partition}): {adds} to add, {dels} to delete",
            partition = self.target.partition,
            adds = add.len(),
            dels = del.len()
        );

        let link = self.kernel.ensure_vrf(&self.target.vrf_spec()).await?;
        self.kernel
            .replace_routes(self.target.partition, link, &add)
            .await?;
        self.kernel
            .delete_routes(self.target.partition, link, &del)
            .await?;
        Ok(())
    }

    /// Drain node events until `shutdown` fires, running one reconcile
    /// pass per delivery (bursts coalesce to the newest event).
    pub async fn run(
        self,
        mut events: mpsc::Receiver<NodeSpec>,
        mut shutdown: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(mut node) = maybe else {
                        debug!("node event stream closed; pod-CIDR exporter stopping");
                        return;
                    };
                    while let Ok(newer) = events.try_recv() {
                        node = newer;
                    }
                    self.reconcile(&node).await;
                }
                _ = shutdown.changed() => {
                    debug!("pod-CIDR exporter stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::desired_pod_prefixes;
    use crate::cluster::NodeSpec;
    use crate::errors::ExporterError;
    use route_manager::PrefixSet;

    #[test]
    fn plural_list_wins_over_singular() {
        let node = NodeSpec {
            pod_cidr: Some("10.9.0.0/24".to_string()),
            pod_cidrs: vec!["10.0.0.0/24".to_string(), "fd00::/64".to_string()],
        };
        let desired = desired_pod_prefixes(&node).unwrap();
        assert_eq!(
            desired,
            ["10.0.0.0/24", "fd00::/64"].into_iter().collect::<PrefixSet>()
        );
    }

    #[test]
    fn singular_field_is_the_fallback() {
        let node = NodeSpec {
            pod_cidr: Some("10.9.0.0/24".to_string()),
            pod_cidrs: vec![],
        };
        let desired = desired_pod_prefixes(&node).unwrap();
        assert_eq!(desired, ["10.9.0.0/24"].into_iter().collect::<PrefixSet>());
    }

    #[test]
    fn empty_node_means_empty_desired_set() {
        let desired = desired_pod_prefixes(&NodeSpec::default()).unwrap();
        assert!(desired.is_empty());
    }

    #[test]
    fn cidrs_are_canonicalized() {
        let node = NodeSpec {
            pod_cidr: Some("10.9.0.55/24".to_string()),
            pod_cidrs: vec![],
        };
        let desired = desired_pod_prefixes(&node).unwrap();
        assert!(desired.exists("10.9.0.0/24"));
    }

    #[test]
    fn bad_cidrs_are_reported() {
        let node = NodeSpec {
            pod_cidr: Some("not-a-cidr".to_string()),
            pod_cidrs: vec![],
        };
        assert!(matches!(
            desired_pod_prefixes(&node),
            Err(ExporterError::InvalidPodCidr(_))
        ));
    }
}
