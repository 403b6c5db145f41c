// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network namespace manipulation, mainly for integration tests that need
//! a scratch networking stack.

#![allow(missing_docs)]

use nix::fcntl::OFlag;
use nix::sched::CloneFlags;
use nix::sys::stat::Mode;
use std::future::Future;
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;
use tracing::error;

/// Run an async function or closure in another network namespace.
///
/// Spawns a new thread, moves it into the namespace at `netns`, and drives
/// the future on a thread-local tokio runtime.
///
/// # Panics
///
/// * If the thread or runtime cannot be created
/// * If the provided function panics
/// * If the namespace swap fails (wrong path, missing capabilities)
pub fn in_netns<
    Exec: (FnOnce() -> Fut) + Send + 'static,
    Fut: Future<Output = Out> + Send,
    Out: Send + 'static,
>(
    netns: &Path,
    exec: Exec,
) -> Out {
    let netns = netns.to_path_buf();
    let thread_name = format!("netns-{}", netns.display());
    #[allow(clippy::expect_used)]
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            #[allow(unsafe_code)] // uses external linux FFI
            unsafe { swap_thread_to_netns(&netns) }.expect("failed to swap to netns");
            let tokio_runtime = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()
                .expect("failed to build tokio runtime");
            tokio_runtime.block_on(exec())
        })
        .expect("failed to spawn netns thread")
        .join()
        .expect("failed to join netns thread")
}

/// Move the current thread to the (extant) network namespace located at
/// `netns_path`.
///
/// # Errors
///
/// Returns an error if `unshare`, `open`, or `setns` fail. The current
/// thread needs `CAP_SYS_ADMIN` and `CAP_NET_ADMIN` for this to succeed.
///
/// # Safety
///
/// If the current thread is bound to network resources (e.g., open
/// sockets), this method will exhibit undefined behavior.
#[allow(unsafe_code)] // documented rationale
pub unsafe fn swap_thread_to_netns(netns_path: &Path) -> Result<(), rtnetlink::Error> {
    if let Err(e) = nix::sched::unshare(CloneFlags::CLONE_NEWNET) {
        error!("unshare error: {e}");
        return Err(rtnetlink::Error::NamespaceError(format!("{e}")));
    }

    let file_descriptor: OwnedFd =
        match nix::fcntl::open(netns_path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
            Ok(fd) => fd,
            Err(e) => {
                error!("open error: {e}");
                return Err(rtnetlink::Error::NamespaceError(format!("open error: {e}")));
            }
        };

    if let Err(e) = nix::sched::setns(file_descriptor.as_fd(), CloneFlags::CLONE_NEWNET) {
        error!("setns error: {e}");
        return Err(rtnetlink::Error::NamespaceError(format!("setns error: {e}")));
    }
    Ok(())
}
