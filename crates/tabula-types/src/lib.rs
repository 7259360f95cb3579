//! Shared identity, version, and wire types for tabula.
//!
//! Leaf crate: no internal tabula dependencies. Both the document model
//! (`tabula-sheet`) and the job client (`tabula-client`) build on it.
//!
//! # Key Types
//!
//! |------------------|-----------------------------------------------|
//! | Type             | Purpose                                       |
//! |------------------|-----------------------------------------------|
//! | [`JobId`]        | One submitted AI job (client-minted UUIDv7)   |
//! | [`BranchId`]     | One user turn; rollback key                   |
//! | [`VersionPair`]  | Document version + optimistic lock token      |
//! | [`JobMode`]      | How the backend treats a message              |
//! | [`JobState`]     | Job lifecycle                                 |
//! | [`Envelope`]     | Framed event on the connection                |
//! | [`JobRequest`]   | Outgoing `job-submit` payload                 |
//! |------------------|-----------------------------------------------|

pub mod ids;
pub mod job;
pub mod protocol;
pub mod version;

pub use ids::{BranchId, ChatId, ChatSessionId, DocumentId, JobId, UserId};
pub use job::{JobMode, JobState};
pub use protocol::{
    Envelope, JobCancelNotice, JobCancelled, JobExecuted, JobFailed, JobPlanned, JobRequest,
    JobTimedOut, RollbackError, RollbackRequest, RollbackResponse, events,
};
pub use version::{VersionPair, VersionToken};
