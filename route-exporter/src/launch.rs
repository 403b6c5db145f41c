// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Assemble and launch the reconciler tasks: the enabled exporters, the
//! VRF+rule reconciler, and the RIB best-path processor.

use crate::cluster::{EndpointInventory, NodeSpec, ServiceLister, VrfBindingLister};
use crate::config::ExporterSettings;
use crate::errors::LastError;
use crate::lbvip::LbVipExporter;
use crate::podcidr::PodCidrExporter;
use crate::vrf::VrfReconciler;
use rib::BestPathProcessor;
use rib::health::HealthMonitor;
use rib::store::Table;
use rib::tables::{fib_table, rib_table};
use route_manager::{Kernel, KernelRouter, Manager};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// The event streams and inventories the upstream watchers feed us.
pub struct Collaborators {
    /// Local-node events for the pod-CIDR exporter.
    pub node_events: mpsc::Receiver<NodeSpec>,
    /// Service-change kicks for the LB-VIP exporter.
    pub service_kicks: mpsc::Receiver<()>,
    /// The current services.
    pub services: Arc<dyn ServiceLister>,
    /// VRF-binding/endpoint change kicks for the VRF reconciler.
    pub vrf_kicks: mpsc::Receiver<()>,
    /// The current VRF bindings.
    pub vrf_bindings: Arc<dyn VrfBindingLister>,
    /// The local pod inventory.
    pub endpoints: Arc<dyn EndpointInventory>,
}

/// A handle over every running task.
///
/// Shutting down stops the tasks; no kernel cleanup is performed, so the
/// partitions' routes survive for the next run to reclaim.
pub struct Agent {
    /// The RIB: candidate routes by owner.
    pub rib: Arc<Table>,
    /// The FIB: the published best path per prefix.
    pub fib: Arc<Table>,
    /// The pod-CIDR exporter's most recent failure, when enabled.
    pub pod_cidr_error: Option<LastError>,
    /// The LB-VIP exporter's most recent failure, when enabled.
    pub lb_vip_error: Option<LastError>,
    /// The VRF reconciler's most recent failure.
    pub vrf_error: LastError,
    /// The best-path processor's health.
    pub processor_health: HealthMonitor,
    shutdown: watch::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Signal every task to stop and wait for them to finish.
    pub async fn shutdown(self) {
        info!("stopping route agent tasks");
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Connect to the kernel over rtnetlink.
///
/// # Errors
///
/// Returns the underlying I/O error when the netlink socket cannot be
/// opened.
pub async fn connect() -> Result<Manager<Kernel>, std::io::Error> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);
    Ok(Manager::new(Arc::new(handle)))
}

/// Spawn every enabled reconciler plus the best-path processor.
pub fn launch<K>(kernel: K, settings: ExporterSettings, collaborators: Collaborators) -> Agent
where
    K: KernelRouter + Clone + Send + Sync + 'static,
{
    let (shutdown, _) = watch::channel(());
    let mut tasks = Vec::new();

    let pod_cidr_error = settings.pod_cidr.as_ref().map(|target| {
        info!(
            "starting pod-CIDR exporter ({partition})",
            partition = target.partition
        );
        let (exporter, last_error) = PodCidrExporter::new(
            kernel.clone(),
            target.clone(),
            settings.address_families.clone(),
        );
        tasks.push(tokio::spawn(
            exporter.run(collaborators.node_events, shutdown.subscribe()),
        ));
        last_error
    });

    let lb_vip_error = settings.lb_vip.as_ref().map(|target| {
        info!(
            "starting LB-VIP exporter ({partition})",
            partition = target.partition
        );
        let (exporter, last_error) = LbVipExporter::new(
            kernel.clone(),
            Arc::clone(&collaborators.services),
            target.clone(),
        );
        tasks.push(tokio::spawn(
            exporter.run(collaborators.service_kicks, shutdown.subscribe()),
        ));
        last_error
    });

    // the exporters' VRFs are off-limits to the binding reconciler
    let reserved = settings
        .pod_cidr
        .iter()
        .chain(settings.lb_vip.iter())
        .map(|target| target.vrf_name.clone())
        .collect();
    let (reconciler, vrf_error) = VrfReconciler::new(
        kernel,
        Arc::clone(&collaborators.vrf_bindings),
        Arc::clone(&collaborators.endpoints),
        reserved,
    );
    tasks.push(tokio::spawn(
        reconciler.run(collaborators.vrf_kicks, shutdown.subscribe()),
    ));

    let rib = Arc::new(rib_table());
    let fib = Arc::new(fib_table());
    let (processor, processor_health) =
        BestPathProcessor::new(Arc::clone(&rib), Arc::clone(&fib));
    tasks.push(tokio::spawn(processor.run(shutdown.subscribe())));

    Agent {
        rib,
        fib,
        pod_cidr_error,
        lb_vip_error,
        vrf_error,
        processor_health,
        shutdown,
        tasks,
    }
}
