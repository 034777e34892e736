//! Error types for every component.
//!
//! Component-local failures are recovered inside the pipeline controller
//! (rollback, best-effort teardown); only a [`PipelineError`] ever reaches
//! the control surface, and only as its display string.

use std::time::Duration;
use thiserror::Error;

use crate::pipeline::Step;

/// Failures talking to the audio server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The server refused one operation (graph edit or query)
    #[error("audio server rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    /// The transport to the server is gone
    #[error("audio server connection lost: {0}")]
    Connection(String),

    /// One call got no answer in time; the connection may still be fine
    #[error("audio server did not answer {operation} within {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The server answered with something we could not parse
    #[error("unexpected reply from audio server: {0}")]
    Protocol(String),
}

impl ServerError {
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ServerError::Connection(_))
    }
}

/// Failures of the memory-lock elevation round trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElevationError {
    #[error("authorization was denied or dismissed")]
    Denied,

    #[error("invalid target process id {raw:?}: {reason}")]
    InvalidTarget { raw: String, reason: String },

    #[error("resource limit change rejected: {0}")]
    LimitRejected(String),

    #[error("no answer from the authorization agent after {0:?}")]
    TimedOut(Duration),

    #[error("could not launch '{program}': {reason}")]
    MechanismUnavailable { program: String, reason: String },

    #[error("elevation helper exited with unexpected status {0:?}")]
    UnexpectedStatus(Option<i32>),
}

/// Failures materializing the embedded filter library
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("embedded filter library '{0}' is missing from this build")]
    MissingArtifact(String),

    #[error("failed to write staged filter library: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an enable/disable request, as seen by the control surface
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("another enable/disable request is still in progress")]
    Busy,

    #[error("capture source '{0}' is not known to the audio server")]
    UnknownSource(String),

    #[error("filter library unavailable: {0}")]
    Staging(#[from] StagingError),

    #[error("memory-lock elevation failed: {0}")]
    Elevation(#[from] ElevationError),

    #[error("failed to {step}: {source}")]
    GraphEdit {
        step: Step,
        #[source]
        source: ServerError,
    },

    #[error("{failed} pipeline module(s) could not be unloaded")]
    Teardown { failed: usize },

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Reasons the state reconciler stops observing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("audio server connection lost: {0}")]
    ConnectionLost(String),

    #[error("reconciler task ended unexpectedly: {0}")]
    TaskFailed(String),
}
