//! Observes the server's module graph and publishes [`SuppressorState`]
//!
//! The published value is always derived from a full module listing, never
//! from individual notifications. Notifications and a periodic tick only
//! decide *when* to re-derive, so lost or duplicated notifications cannot
//! leave the value stale for longer than one interval.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::error::ReconcileError;
use crate::pipeline::graph::Survey;
use crate::pulse::{AudioServer, Facility, ModuleRecord};

/// Whether the noise-suppression pipeline is loaded on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressorState {
    Unloaded,
    Loaded,
    /// Some but not all pipeline modules are present, or not yet observed
    Transitioning,
}

impl fmt::Display for SuppressorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuppressorState::Unloaded => "unloaded",
            SuppressorState::Loaded => "loaded",
            SuppressorState::Transitioning => "transitioning",
        })
    }
}

/// Ground truth for a module listing
pub fn derive_state(modules: &[ModuleRecord]) -> SuppressorState {
    let survey = Survey::take(modules);
    if survey.is_empty() {
        SuppressorState::Unloaded
    } else if survey.is_complete() {
        SuppressorState::Loaded
    } else {
        SuppressorState::Transitioning
    }
}

pub struct StateReconciler;

impl StateReconciler {
    /// Start observing `server`, re-deriving on every module notification
    /// and at least once per `interval`
    pub fn spawn(server: Arc<dyn AudioServer>, interval: Duration) -> ReconcilerHandle {
        let (tx, rx) = watch::channel(SuppressorState::Transitioning);
        let task = tokio::spawn(run(server, interval, tx));
        ReconcilerHandle { rx, task }
    }
}

/// Owner of the reconciler task
pub struct ReconcilerHandle {
    rx: watch::Receiver<SuppressorState>,
    task: JoinHandle<Result<Infallible, ReconcileError>>,
}

impl ReconcilerHandle {
    /// Read-only view of the published state
    pub fn subscribe(&self) -> watch::Receiver<SuppressorState> {
        self.rx.clone()
    }

    pub fn current(&self) -> SuppressorState {
        *self.rx.borrow()
    }

    /// Wait for the task to stop. It only ever stops on failure.
    ///
    /// Must not be awaited again once it has returned.
    pub async fn finished(&mut self) -> ReconcileError {
        match (&mut self.task).await {
            Ok(Err(e)) => e,
            Ok(Ok(never)) => match never {},
            Err(e) => ReconcileError::TaskFailed(e.to_string()),
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn run(
    server: Arc<dyn AudioServer>,
    interval: Duration,
    tx: watch::Sender<SuppressorState>,
) -> Result<Infallible, ReconcileError> {
    let mut events = server
        .subscribe()
        .await
        .map_err(|e| ReconcileError::ConnectionLost(e.to_string()))?;
    info!(
        "👀 Watching {} module graph (fallback interval {:?})",
        server.name(),
        interval
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("🔌 Audio server notification stream closed");
                    return Err(ReconcileError::ConnectionLost(
                        "notification stream closed".to_string(),
                    ));
                };
                trace!("Server event: {:?}", event);
                let mut relevant = event.facility == Facility::Module;
                // A burst of notifications needs only one re-derive
                while let Ok(event) = events.try_recv() {
                    relevant |= event.facility == Facility::Module;
                }
                if !relevant {
                    continue;
                }
            }
            _ = ticker.tick() => {}
        }

        observe(server.as_ref(), &tx).await?;
    }
}

async fn observe(
    server: &dyn AudioServer,
    tx: &watch::Sender<SuppressorState>,
) -> Result<(), ReconcileError> {
    let modules = match server.list_modules().await {
        Ok(modules) => modules,
        Err(e) if e.is_connection_loss() => {
            return Err(ReconcileError::ConnectionLost(e.to_string()))
        }
        Err(e) => {
            // Retried on the next trigger
            warn!("Module list query failed: {}", e);
            return Ok(());
        }
    };

    let state = derive_state(&modules);
    let previous = *tx.borrow();
    tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });

    if previous != state {
        info!("🎚️  Noise suppression {} (was {})", state, previous);
    } else {
        debug!("Noise suppression still {}", state);
    }
    Ok(())
}
