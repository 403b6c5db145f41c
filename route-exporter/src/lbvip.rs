// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The LB-VIP exporter: keeps one kernel partition equal to the host
//! prefixes of the cluster's load-balancer ingress IPs.

use crate::cluster::{Service, ServiceLister, ServiceType};
use crate::config::ExportTarget;
use crate::errors::{ExporterError, LastError, LastErrorSlot, last_error_channel};
use net::route::AddressFamily;
use route_manager::route::host_prefix;
use route_manager::{KernelRouter, PrefixSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// The host prefixes to export: one /32 or /128 per load-balancer service
/// with exactly one ingress IP.
fn desired_vip_prefixes(services: &[Service]) -> PrefixSet {
    services
        .iter()
        .filter(|service| service.service_type == ServiceType::LoadBalancer)
        .filter_map(|service| match service.ingress_ips.as_slice() {
            [ip] => Some(host_prefix(*ip).to_string()),
            _ => None,
        })
        .collect()
}

/// Reconciles load-balancer VIPs into one `{table, protocol}` kernel
/// partition through one VRF device.
pub struct LbVipExporter<K> {
    kernel: K,
    services: Arc<dyn ServiceLister>,
    target: ExportTarget,
    last_error: LastErrorSlot,
}

impl<K: KernelRouter> LbVipExporter<K> {
    /// Build the exporter and the observable for its most recent failure.
    #[must_use]
    pub fn new(
        kernel: K,
        services: Arc<dyn ServiceLister>,
        target: ExportTarget,
    ) -> (Self, LastError) {
        let (slot, observer) = last_error_channel();
        (
            LbVipExporter {
                kernel,
                services,
                target,
                last_error: slot,
            },
            observer,
        )
    }

    /// Run one full reconcile pass, parking any failure in the
    /// `last_error` slot.
    pub async fn reconcile(&self) {
        let outcome = self.sync().await;
        if let Err(err) = &outcome {
            warn!(
                "LB-VIP reconcile failed ({partition}): {err}",
                partition = self.target.partition
            );
        }
        self.last_error.record(outcome);
    }

    async fn sync(&self) -> Result<(), ExporterError> {
        let desired = desired_vip_prefixes(&self.services.list());
        let current = self
            .kernel
            .list_routes(
                self.target.partition,
                &[AddressFamily::Ipv4, AddressFamily::Ipv6],
            )
            .await?;
        let (add, del) = desired.distance(&current);
        debug!(
            "LB-VIP pass ({partition}): {adds} to add, {dels} to delete",
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

    /// Drain service-change kicks until `shutdown` fires, one full pass
    /// per delivery.
    pub async fn run(self, mut kicks: mpsc::Receiver<()>, mut shutdown: watch::Receiver<()>) {
        loop {
            tokio::select! {
                maybe = kicks.recv() => {
                    if maybe.is_none() {
                        debug!("service kick stream closed; LB-VIP exporter stopping");
                        return;
                    }
                    self.reconcile().await;
                }
                _ = shutdown.changed() => {
                    debug!("LB-VIP exporter stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::desired_vip_prefixes;
    use crate::cluster::{Service, ServiceType};
    use route_manager::PrefixSet;

    #[test]
    fn only_single_ingress_load_balancers_export() {
        let services = vec![
            Service {
                service_type: ServiceType::LoadBalancer,
                ingress_ips: vec!["192.0.2.10".parse().unwrap()],
            },
            Service {
                service_type: ServiceType::LoadBalancer,
                ingress_ips: vec![],
            },
            Service {
                service_type: ServiceType::ClusterIp,
                ingress_ips: vec![],
            },
            Service {
                service_type: ServiceType::LoadBalancer,
                ingress_ips: vec!["2001:db8::10".parse().unwrap()],
            },
        ];
        let desired = desired_vip_prefixes(&services);
        assert_eq!(
            desired,
            ["192.0.2.10/32", "2001:db8::10/128"]
                .into_iter()
                .collect::<PrefixSet>()
        );
    }

    #[test]
    fn multi_ingress_services_are_skipped() {
        let services = vec![Service {
            service_type: ServiceType::LoadBalancer,
            ingress_ips: vec!["192.0.2.10".parse().unwrap(), "192.0.2.11".parse().unwrap()],
        }];
        assert!(desired_vip_prefixes(&services).is_empty());
    }
}
