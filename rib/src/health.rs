// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Health reporting for long-running jobs.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The health of a long-running job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Health {
    /// The job has not completed a pass yet.
    Starting,
    /// The last pass completed cleanly.
    Ok,
    /// The last pass hit a problem; the job keeps running.
    Degraded {
        /// What went wrong.
        reason: String,
    },
}

/// The reporting side of a health channel, held by the job.
#[derive(Clone, Debug)]
pub struct HealthReporter(watch::Sender<Health>);

/// The observing side of a health channel.
#[derive(Clone, Debug)]
pub struct HealthMonitor(watch::Receiver<Health>);

/// Build a connected reporter/monitor pair, initially [`Health::Starting`].
#[must_use]
pub fn channel() -> (HealthReporter, HealthMonitor) {
    let (tx, rx) = watch::channel(Health::Starting);
    (HealthReporter(tx), HealthMonitor(rx))
}

impl HealthReporter {
    /// Report a clean pass.
    pub fn ok(&self) {
        self.0.send_if_modified(|health| {
            let changed = *health != Health::Ok;
            *health = Health::Ok;
            changed
        });
    }

    /// Report a failed pass with its cause.
    pub fn degraded(&self, reason: impl Into<String>) {
        let health = Health::Degraded {
            reason: reason.into(),
        };
        self.0.send_replace(health);
    }
}

impl HealthMonitor {
    /// The current health.
    #[must_use]
    pub fn current(&self) -> Health {
        self.0.borrow().clone()
    }

    /// Wait for the health to change.
    pub async fn changed(&mut self) {
        let _ = self.0.changed().await;
    }
}
