// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The best-path processor: keeps the FIB equal to the per-prefix minimum
//! administrative distance over the RIB.

use crate::health::{self, HealthMonitor, HealthReporter};
use crate::store::Table;
use crate::tables::{Prefix, Route, by_prefix};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// A long-running job that recomputes the best path for every prefix whose
/// RIB rows changed and publishes the winners to the FIB.
pub struct BestPathProcessor {
    rib: Arc<Table>,
    fib: Arc<Table>,
    health: HealthReporter,
}

impl BestPathProcessor {
    /// Build a processor over the given tables, returning the handle its
    /// health is observable through.
    #[must_use]
    pub fn new(rib: Arc<Table>, fib: Arc<Table>) -> (Self, HealthMonitor) {
        let (reporter, monitor) = health::channel();
        (
            BestPathProcessor {
                rib,
                fib,
                health: reporter,
            },
            monitor,
        )
    }

    /// The surviving RIB row with the lowest administrative distance for
    /// `prefix`, or `None` when the last row was withdrawn.
    ///
    /// Reads a fresh snapshot so a row deleted by the commit that woke us
    /// is not observed. Ties within one distance class resolve to the
    /// first row in primary-key order; callers must not rely on which.
    fn select_best(&self, prefix: &Prefix) -> Option<Route> {
        let snapshot = self.rib.snapshot();
        let (routes, _) = self.rib.get(&snapshot, &by_prefix(prefix));
        let mut best: Option<Route> = None;
        for route in routes {
            match &best {
                Some(incumbent)
                    if route.protocol.admin_distance() >= incumbent.protocol.admin_distance() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    /// Run best-path selection until `shutdown` fires.
    ///
    /// Each pass drains the RIB change tracker, updates the FIB per
    /// changed prefix, reports health, and then sleeps on the tracker
    /// watch.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        let mut tracker = {
            let mut wtxn = self.rib.write();
            let tracker = wtxn.register_tracker("best-path-selection");
            wtxn.commit();
            tracker
        };

        loop {
            let (changes, watch) = tracker.changes(&self.rib);
            for change in changes {
                let prefix = change.route.prefix.clone();
                let best = self.select_best(&prefix);

                let mut wtxn = self.fib.write();
                match best {
                    Some(best) => {
                        trace!("promoting {best:?} for {prefix}");
                        wtxn.insert(best);
                    }
                    None => {
                        // no candidate left: drop the published entry
                        trace!("withdrawing {prefix} from the FIB");
                        wtxn.delete(&change.route);
                    }
                }
                wtxn.commit();
            }
            self.health.ok();

            tokio::select! {
                () = watch.wait() => {}
                _ = shutdown.changed() => {
                    debug!("best-path selection stopping");
                    return;
                }
            }
        }
    }
}
