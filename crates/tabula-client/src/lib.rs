//! tabula job client
//!
//! Runs AI jobs against a shared, versioned spreadsheet over one persistent
//! connection, while the user keeps editing locally.
//!
//! # Layers
//!
//! - [`transport`]: [`Dialer`] seam, TCP and in-memory links
//! - [`connector`]: one link, per-event listeners, connection state
//! - [`jobs`]: correlation table of in-flight jobs
//! - [`version`]: optimistic version/lock pair
//! - [`client`]: [`JobClient`] façade (submit, cancel, rollback)
//! - [`turns`]: per-message branch ids and the turn state machine
//! - [`session`]: [`AgentSession`], the composition root for one document
//! - [`config`]: RON-backed [`ClientConfig`]

pub mod client;
pub mod config;
pub mod connector;
pub mod constants;
pub mod jobs;
pub mod session;
pub mod transport;
pub mod turns;
pub mod version;

use tabula_types::BranchId;
use thiserror::Error;

pub use client::{JobClient, JobHandle, JobSubmission};
pub use config::{ClientConfig, ConfigError};
pub use connector::{ConnectionState, Connector, ListenerId};
pub use jobs::{CancelOutcome, JobResult, JobTable};
pub use session::{AgentSession, SessionError, TurnOutcome, TurnResult, TurnTicket};
pub use transport::{Dialer, Link, MemoryDialer, MemoryPeer, TcpDialer, TransportError};
pub use turns::{Turn, TurnError, TurnManager, TurnState};
pub use version::{Advance, Candidate, VersionError, VersionStore};

/// Errors surfaced to callers of the job client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    /// `job-error` from the backend. Displays the backend message verbatim.
    #[error("{message}")]
    BackendError { message: String },
    #[error("job cancelled")]
    JobCancelled,
    #[error("job timed out")]
    JobTimedOut,
    #[error("rollback failed: {message}")]
    RollbackFailed { message: String },
    #[error("a job for branch {branch_id} is still in flight")]
    JobInFlight { branch_id: BranchId },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
