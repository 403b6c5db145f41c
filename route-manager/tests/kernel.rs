// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end exercise of the kernel router adapter inside a scratch
//! network namespace. Skips cleanly when the environment lacks the
//! capabilities to create one.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use route_manager::netns::in_netns;
use route_manager::route::RoutePartition;
use route_manager::rule::PolicyRule;
use route_manager::vrf::VrfSpec;
use route_manager::{Kernel, KernelError, KernelRouter, Manager, PrefixSet};

use net::route::AddressFamily;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_test::traced_test;

const NETNS: &str = "route-manager-test";

fn netns_path() -> PathBuf {
    PathBuf::from(format!("/run/netns/{NETNS}"))
}

fn partition(table: u32, protocol: u8) -> RoutePartition {
    RoutePartition {
        table: table.try_into().unwrap(),
        protocol: protocol.try_into().unwrap(),
    }
}

async fn exercise_adapter() {
    let (connection, handle, _) = rtnetlink::new_connection().unwrap();
    tokio::spawn(connection);
    let manager: Manager<Kernel> = Manager::new(Arc::new(handle));

    // VRF creation is idempotent and reports a stable ifindex.
    let spec = VrfSpec {
        name: "vrf-test".try_into().unwrap(),
        table_id: 100u32.try_into().unwrap(),
    };
    let index = manager.ensure_vrf(&spec).await.unwrap();
    let again = manager.ensure_vrf(&spec).await.unwrap();
    assert_eq!(index, again);

    // A conflicting binding is surfaced, not corrected.
    let conflicting = VrfSpec {
        name: spec.name.clone(),
        table_id: 200u32.try_into().unwrap(),
    };
    assert!(matches!(
        manager.ensure_vrf(&conflicting).await,
        Err(KernelError::VrfMismatch { .. })
    ));

    let mine = partition(100, 201);
    let families = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    // Install two prefixes and read them back through the partition filter.
    let desired: PrefixSet = ["10.10.0.0/24", "10.10.1.0/24"].into_iter().collect();
    manager.replace_routes(mine, index, &desired).await.unwrap();
    let current = manager.list_routes(mine, &families).await.unwrap();
    assert_eq!(current, desired);

    // Replaying the same replace is a no-op.
    manager.replace_routes(mine, index, &desired).await.unwrap();
    assert_eq!(manager.list_routes(mine, &families).await.unwrap(), desired);

    // A foreign protocol id sees none of our routes.
    let foreign = partition(100, 202);
    assert!(manager.list_routes(foreign, &families).await.unwrap().is_empty());

    // Deleting is idempotent.
    let withdrawn: PrefixSet = ["10.10.1.0/24"].into_iter().collect();
    manager.delete_routes(mine, index, &withdrawn).await.unwrap();
    manager.delete_routes(mine, index, &withdrawn).await.unwrap();
    let current = manager.list_routes(mine, &families).await.unwrap();
    assert_eq!(current, ["10.10.0.0/24"].into_iter().collect::<PrefixSet>());

    // Rules round-trip at their priority and nowhere else.
    let rule = PolicyRule {
        src: "10.10.0.5/32".parse().unwrap(),
        dst: "10.99.0.0/16".parse().unwrap(),
        table: 100u32.try_into().unwrap(),
        priority: 999u32.try_into().unwrap(),
    };
    manager.ensure_rule(&rule).await.unwrap();
    manager.ensure_rule(&rule).await.unwrap();
    let rules = manager.list_rules(rule.priority).await.unwrap();
    assert!(rules.contains(&rule));
    assert!(
        !manager
            .list_rules(998u32.try_into().unwrap())
            .await
            .unwrap()
            .contains(&rule)
    );
    manager.delete_rule(&rule).await.unwrap();
    manager.delete_rule(&rule).await.unwrap();
    assert!(!manager.list_rules(rule.priority).await.unwrap().contains(&rule));

    // VRF removal is idempotent and actually removes the device.
    manager.delete_vrf(&spec.name).await.unwrap();
    manager.delete_vrf(&spec.name).await.unwrap();
    assert!(
        manager
            .list_vrfs()
            .await
            .unwrap()
            .iter()
            .all(|device| device.name != spec.name)
    );
}

#[traced_test]
#[test]
fn kernel_adapter_round_trip() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root (CAP_NET_ADMIN + CAP_SYS_ADMIN)");
        return;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap();
    if runtime
        .block_on(rtnetlink::NetworkNamespace::add(NETNS.to_string()))
        .is_err()
    {
        eprintln!("skipping: cannot create a network namespace here");
        return;
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        in_netns(&netns_path(), exercise_adapter);
    }));

    let _ = runtime.block_on(rtnetlink::NetworkNamespace::del(NETNS.to_string()));

    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}
