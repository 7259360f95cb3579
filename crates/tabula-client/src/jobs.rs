//! Job correlation table.
//!
//! Maps each in-flight [`JobId`] to its pending record: the immutable request
//! snapshot, the plan (once announced), and the one-shot continuation of the
//! caller awaiting the job.
//!
//! Every terminal dispatcher does lookup-and-remove under one lock
//! acquisition, so a continuation fires at most once no matter how many
//! duplicate or late terminal events arrive. Continuations themselves fire
//! with the lock released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tabula_types::{
    BranchId, ChatSessionId, JobExecuted, JobId, JobPlanned, JobRequest, JobState, VersionPair,
};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::ClientError;

/// Successful outcome of one job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobResult {
    pub job_id: JobId,
    pub branch_id: BranchId,
    /// Plan from the first `job-planned`, if any was received.
    pub plan: Option<Value>,
    pub chat_session_id: Option<ChatSessionId>,
    /// Raw `editCommands` payload for the command router.
    pub edit_commands: Value,
    /// New version pair, when the backend sent a complete one.
    pub versions: Option<VersionPair>,
    pub message: Option<String>,
}

/// Result of [`JobTable::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was pending and has been rejected with `JobCancelled`.
    LocallyCancelled,
    /// The job was unknown or already settled. Nothing changed.
    NotPending,
}

pub(crate) type JobReply = oneshot::Sender<Result<JobResult, ClientError>>;

struct PendingJob {
    request: Arc<JobRequest>,
    state: JobState,
    plan: Option<Value>,
    reply: JobReply,
}

#[derive(Default)]
pub struct JobTable {
    pending: Mutex<HashMap<JobId, PendingJob>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry for `request.job_id`.
    ///
    /// Returns the receiving half of the job's continuation.
    pub fn register(
        &self,
        request: Arc<JobRequest>,
    ) -> oneshot::Receiver<Result<JobResult, ClientError>> {
        let (reply, rx) = oneshot::channel();
        let job_id = request.job_id;
        let entry = PendingJob {
            request,
            state: JobState::Pending,
            plan: None,
            reply,
        };
        self.pending.lock().insert(job_id, entry);
        trace!("Registered job {}", job_id.short());
        rx
    }

    /// Drop an entry without settling it (the request never left).
    pub fn remove(&self, job_id: JobId) -> bool {
        self.pending.lock().remove(&job_id).is_some()
    }

    /// Record a `job-planned` event. Returns the job's new state, or `None`
    /// for an unknown job.
    ///
    /// The first plan is kept; later plans only advance the job to
    /// `Executing`.
    pub fn on_planned(&self, event: JobPlanned) -> Option<JobState> {
        let mut pending = self.pending.lock();
        let entry = pending.get_mut(&event.job_id)?;
        if entry.plan.is_none() {
            entry.plan = Some(event.plan);
            entry.state = JobState::Planned;
        } else {
            entry.state = JobState::Executing;
        }
        Some(entry.state)
    }

    /// Settle a job successfully from its `job-tasks-executed` event.
    ///
    /// `before_settle` runs after the entry has left the table and before the
    /// continuation fires. Returns `false` if the job was not pending.
    pub fn resolve(&self, event: JobExecuted, before_settle: impl FnOnce(&JobResult)) -> bool {
        let Some(entry) = self.pending.lock().remove(&event.job_id) else {
            debug!("job-tasks-executed for unknown job {}, ignoring", event.job_id.short());
            return false;
        };

        let versions = VersionPair::from_parts(
            event.spread_sheet_version_id.as_ref(),
            event.edit_lock_version.as_ref(),
        );
        let result = JobResult {
            job_id: event.job_id,
            branch_id: entry.request.branch_id,
            plan: entry.plan,
            chat_session_id: event.chat_session_id,
            edit_commands: event.edit_commands,
            versions,
            message: event.message,
        };
        before_settle(&result);

        trace!("Job {} {:?} -> {}", event.job_id.short(), entry.state, JobState::Completed);
        let _ = entry.reply.send(Ok(result));
        true
    }

    /// Settle a job with an error. `terminal` is the state it lands in.
    pub fn reject(&self, job_id: JobId, terminal: JobState, error: ClientError) -> bool {
        let Some(entry) = self.pending.lock().remove(&job_id) else {
            debug!("{} for unknown job {}, ignoring", terminal, job_id.short());
            return false;
        };
        trace!("Job {} {:?} -> {}", job_id.short(), entry.state, terminal);
        let _ = entry.reply.send(Err(error));
        true
    }

    /// Local cancellation.
    pub fn cancel(&self, job_id: JobId) -> CancelOutcome {
        if self.reject(job_id, JobState::Cancelled, ClientError::JobCancelled) {
            CancelOutcome::LocallyCancelled
        } else {
            CancelOutcome::NotPending
        }
    }

    /// Reject every pending job with `ConnectionClosed` and empty the table.
    /// Returns how many jobs were drained.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingJob> = self.pending.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(ClientError::ConnectionClosed));
        }
        count
    }

    /// Whether a pending job is tagged with `branch_id`.
    pub fn has_branch(&self, branch_id: BranchId) -> bool {
        self.pending
            .lock()
            .values()
            .any(|e| e.request.branch_id == branch_id)
    }

    pub fn state(&self, job_id: JobId) -> Option<JobState> {
        self.pending.lock().get(&job_id).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_types::{ChatId, DocumentId, JobMode, UserId, VersionToken};

    fn request() -> Arc<JobRequest> {
        Arc::new(JobRequest {
            job_id: JobId::new(),
            document_id: DocumentId::from("doc"),
            chat_id: ChatId::from("chat"),
            chat_session_id: None,
            branch_id: BranchId::new(),
            user_id: UserId::from("guest"),
            mode: JobMode::Agent,
            user_question_message: "sum column B".into(),
            selected_sheet_names: vec!["Sheet1".into()],
            spread_sheet_version_id: Some(VersionToken::from("v1")),
            edit_lock_version: Some(VersionToken::from("L1")),
            new_version_spread_sheet_data: None,
        })
    }

    fn executed(job_id: JobId) -> JobExecuted {
        JobExecuted {
            job_id,
            chat_session_id: Some(ChatSessionId::from("cs")),
            edit_commands: json!({"schema": "sheet-edit/v1", "commands": []}),
            spread_sheet_version_id: Some(VersionToken::from("v2")),
            edit_lock_version: Some(VersionToken::from("L2")),
            message: Some("done".into()),
        }
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    #[tokio::test]
    async fn test_resolve_carries_plan_and_versions() {
        let table = JobTable::new();
        let req = request();
        let rx = table.register(Arc::clone(&req));

        assert_eq!(
            table.on_planned(JobPlanned {
                job_id: req.job_id,
                plan: json!(["read", "write"]),
            }),
            Some(JobState::Planned)
        );
        assert_eq!(
            table.on_planned(JobPlanned {
                job_id: req.job_id,
                plan: json!(["ignored"]),
            }),
            Some(JobState::Executing)
        );

        let mut observed = None;
        assert!(table.resolve(executed(req.job_id), |r| observed = r.versions.clone()));
        assert_eq!(observed, Some(VersionPair::new("v2", "L2")));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.plan, Some(json!(["read", "write"])));
        assert_eq!(result.branch_id, req.branch_id);
        assert_eq!(result.message.as_deref(), Some("done"));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_at_most_once_settlement() {
        let table = JobTable::new();
        let req = request();
        let rx = table.register(Arc::clone(&req));

        assert!(table.reject(
            req.job_id,
            JobState::Failed,
            ClientError::BackendError {
                message: "lock mismatch".into()
            }
        ));
        assert!(!table.resolve(executed(req.job_id), |_| panic!("must not run")));
        assert!(!table.reject(req.job_id, JobState::TimedOut, ClientError::JobTimedOut));

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::BackendError { ref message } if message == "lock mismatch"));
    }

    #[test]
    fn test_planned_for_unknown_job_is_ignored() {
        let table = JobTable::new();
        assert_eq!(
            table.on_planned(JobPlanned {
                job_id: JobId::new(),
                plan: json!({}),
            }),
            None
        );
    }

    // ========================================================================
    // Cancellation and teardown
    // ========================================================================

    #[tokio::test]
    async fn test_cancel_then_late_event() {
        let table = JobTable::new();
        let req = request();
        let rx = table.register(Arc::clone(&req));

        assert_eq!(table.cancel(req.job_id), CancelOutcome::LocallyCancelled);
        assert_eq!(table.cancel(req.job_id), CancelOutcome::NotPending);
        assert!(!table.resolve(executed(req.job_id), |_| {}));

        assert!(matches!(rx.await.unwrap(), Err(ClientError::JobCancelled)));
    }

    #[tokio::test]
    async fn test_fail_all_drains_everything() {
        let table = JobTable::new();
        let a = table.register(request());
        let b = table.register(request());

        assert_eq!(table.fail_all(), 2);
        assert!(table.is_empty());
        assert!(matches!(a.await.unwrap(), Err(ClientError::ConnectionClosed)));
        assert!(matches!(b.await.unwrap(), Err(ClientError::ConnectionClosed)));
    }

    #[test]
    fn test_has_branch() {
        let table = JobTable::new();
        let req = request();
        let _rx = table.register(Arc::clone(&req));
        assert!(table.has_branch(req.branch_id));
        assert!(!table.has_branch(BranchId::new()));
        assert!(table.remove(req.job_id));
        assert!(!table.has_branch(req.branch_id));
    }
}
