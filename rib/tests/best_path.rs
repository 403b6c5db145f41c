// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end behavior of the best-path processor over the RIB/FIB pair.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rib::BestPathProcessor;
use rib::store::Table;
use rib::tables::{
    NextHop, NextHopKind, Protocol, Route, by_nexthop_kind, fib_by_prefix, fib_table, rib_table,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn route(prefix: &str, owner: &str, protocol: Protocol) -> Route {
    Route {
        prefix: prefix.parse().unwrap(),
        next_hop: NextHop::V4("10.0.0.1".parse().unwrap()),
        protocol,
        owner: owner.into(),
    }
}

struct Fixture {
    rib: Arc<Table>,
    fib: Arc<Table>,
    shutdown: watch::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Fixture {
    fn start() -> Fixture {
        let rib = Arc::new(rib_table());
        let fib = Arc::new(fib_table());
        let (processor, _health) = BestPathProcessor::new(Arc::clone(&rib), Arc::clone(&fib));
        let (shutdown, shutdown_rx) = watch::channel(());
        let task = tokio::spawn(processor.run(shutdown_rx));
        Fixture {
            rib,
            fib,
            shutdown,
            task,
        }
    }

    fn insert(&self, route: Route) {
        let mut wtxn = self.rib.write();
        wtxn.insert(route);
        wtxn.commit();
    }

    fn delete(&self, route: &Route) {
        let mut wtxn = self.rib.write();
        wtxn.delete(route);
        wtxn.commit();
    }

    fn fib_entry(&self, route: &Route) -> Option<Route> {
        let snapshot = self.fib.snapshot();
        let (entry, _) = self.fib.first(&snapshot, &fib_by_prefix(&route.prefix));
        entry
    }

    async fn eventually(&self, what: &str, check: impl Fn(&Fixture) -> bool) {
        for _ in 0..200 {
            if check(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap();
    }
}

#[tokio::test]
async fn best_path_follows_admin_distance() {
    let f = Fixture::start();

    let ebgp = route("10.0.0.0/24", "ownerB", Protocol::Ebgp);
    let kubernetes = route("10.0.0.0/24", "ownerA", Protocol::Kubernetes);
    let ibgp = route("10.0.0.0/24", "ownerC", Protocol::Ibgp);

    // first candidate wins by default
    f.insert(ebgp.clone());
    f.eventually("eBGP route published", |f| {
        f.fib_entry(&ebgp) == Some(ebgp.clone())
    })
    .await;

    // shorter distance displaces it
    f.insert(kubernetes.clone());
    f.eventually("kubernetes route published", |f| {
        f.fib_entry(&ebgp) == Some(kubernetes.clone())
    })
    .await;

    // withdrawing the winner promotes the next best
    f.delete(&kubernetes);
    f.eventually("eBGP route promoted again", |f| {
        f.fib_entry(&ebgp) == Some(ebgp.clone())
    })
    .await;

    // a longer-distance candidate changes nothing
    f.insert(ibgp.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.fib_entry(&ebgp), Some(ebgp.clone()));

    f.stop().await;
}

#[tokio::test]
async fn last_withdrawal_empties_the_fib() {
    let f = Fixture::start();

    let only = route("10.1.0.0/24", "ownerA", Protocol::Kubernetes);
    f.insert(only.clone());
    f.eventually("route published", |f| f.fib_entry(&only) == Some(only.clone()))
        .await;

    f.delete(&only);
    f.eventually("route withdrawn", |f| f.fib_entry(&only).is_none())
        .await;

    f.stop().await;
}

#[tokio::test]
async fn processor_converges_routes_inserted_before_start() {
    let rib = Arc::new(rib_table());
    let fib = Arc::new(fib_table());

    let early = route("10.2.0.0/24", "ownerA", Protocol::Kubernetes);
    {
        let mut wtxn = rib.write();
        wtxn.insert(early.clone());
        wtxn.commit();
    }

    let (processor, _health) = BestPathProcessor::new(Arc::clone(&rib), Arc::clone(&fib));
    let (shutdown, shutdown_rx) = watch::channel(());
    let task = tokio::spawn(processor.run(shutdown_rx));

    for _ in 0..200 {
        let snapshot = fib.snapshot();
        let (entry, _) = fib.first(&snapshot, &fib_by_prefix(&early.prefix));
        if entry == Some(early.clone()) {
            let _ = shutdown.send(());
            task.await.unwrap();
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pre-existing route never reached the FIB");
}

#[tokio::test]
async fn fib_serves_nexthop_kind_lookups() {
    let f = Fixture::start();

    let v4 = route("10.3.0.0/24", "ownerA", Protocol::Kubernetes);
    let mut v6 = route("fd00::/64", "ownerA", Protocol::Kubernetes);
    v6.next_hop = NextHop::V6("fd00::1".parse().unwrap());

    f.insert(v4.clone());
    f.insert(v6.clone());
    f.eventually("both routes published", |f| {
        f.fib_entry(&v4).is_some() && f.fib_entry(&v6).is_some()
    })
    .await;

    let snapshot = f.fib.snapshot();
    let (v4_rows, _) = f.fib.get(&snapshot, &by_nexthop_kind(NextHopKind::V4));
    assert_eq!(v4_rows, vec![v4]);
    let (v6_rows, _) = f.fib.get(&snapshot, &by_nexthop_kind(NextHopKind::V6));
    assert_eq!(v6_rows, vec![v6]);

    f.stop().await;
}
