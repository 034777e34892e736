//! SIGINT/SIGTERM handling
//!
//! Handlers are registered as soon as [`ShutdownSignal::install`] returns, so
//! a signal that arrives before anyone waits is still seen by the next
//! [`ShutdownSignal::recv`] instead of killing the process outright.

use std::future::Future;
use tokio::signal::unix::{signal, Signal, SignalKind};

pub struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM. Cancel safe.
    pub async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

/// Run `work` unless `shutdown` completes first.
///
/// On shutdown the work future is dropped, which releases whatever it holds
/// (child processes spawned with `kill_on_drop`, controller locks).
pub async fn until_shutdown<F, S>(work: F, shutdown: S) -> Option<F::Output>
where
    F: Future,
    S: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = shutdown => None,
        output = work => Some(output),
    }
}
