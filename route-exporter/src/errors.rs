// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library, and the observable slot an
//! exporter parks its most recent failure in.

use route_manager::KernelError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors an exporter pass can hit.
///
/// None of these crash the exporter: the pass stores the error and the
/// next event (or kick) reconciles from scratch.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// The kernel router adapter failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// The node object carried a pod CIDR that does not parse.
    #[error("node carries an invalid pod CIDR {0}")]
    InvalidPodCidr(String),
}

/// The writing side of an exporter's `last_error` observable.
#[derive(Clone, Debug)]
pub struct LastErrorSlot(watch::Sender<Option<Arc<ExporterError>>>);

/// The reading side of an exporter's `last_error` observable.
///
/// Holds the most recent pass failure, or `None` after a clean pass.
#[derive(Clone, Debug)]
pub struct LastError(watch::Receiver<Option<Arc<ExporterError>>>);

/// Build a connected slot/observer pair, initially clean.
#[must_use]
pub fn last_error_channel() -> (LastErrorSlot, LastError) {
    let (tx, rx) = watch::channel(None);
    (LastErrorSlot(tx), LastError(rx))
}

impl LastErrorSlot {
    /// Record the outcome of a pass.
    pub fn record(&self, outcome: Result<(), ExporterError>) {
        match outcome {
            Ok(()) => {
                self.0.send_replace(None);
            }
            Err(err) => {
                self.0.send_replace(Some(Arc::new(err)));
            }
        }
    }
}

impl LastError {
    /// The most recent failure, or `None` after a clean pass.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ExporterError>> {
        self.0.borrow().clone()
    }

    /// Wait for the slot to change.
    pub async fn changed(&mut self) {
        let _ = self.0.changed().await;
    }
}
