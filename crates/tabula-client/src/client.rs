//! Job client façade.
//!
//! [`JobClient`] wires the [`JobTable`] and [`VersionStore`] to a
//! [`Connector`]: it installs one listener per backend job event, builds and
//! sends job requests, and runs the rollback exchange.
//!
//! ```text
//!   submit_job ──▶ JobTable.register ──▶ Connector.send(job-submit)
//!                                              │
//!   job-planned ─────────▶ JobTable.on_planned │
//!   job-tasks-executed ──▶ VersionStore.try_advance, then JobTable.resolve
//!   job-error / job-cancelled / job-timeout ──▶ JobTable.reject
//!   state Disconnected ──▶ JobTable.fail_all
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tabula_types::{
    BranchId, ChatId, ChatSessionId, DocumentId, JobCancelNotice, JobCancelled, JobExecuted,
    JobFailed, JobId, JobMode, JobPlanned, JobRequest, JobState, JobTimedOut, RollbackError,
    RollbackRequest, RollbackResponse, UserId, events,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::connector::{ConnectionState, Connector, ListenerId};
use crate::jobs::{CancelOutcome, JobResult, JobTable};
use crate::version::{Candidate, VersionStore};

/// Everything the caller decides about a job. Ids and version claims are
/// filled in by [`JobClient::submit_job`].
#[derive(Clone, Debug)]
pub struct JobSubmission {
    pub document_id: DocumentId,
    pub chat_id: ChatId,
    pub chat_session_id: Option<ChatSessionId>,
    pub branch_id: BranchId,
    pub user_id: UserId,
    pub mode: JobMode,
    pub message: String,
    pub selected_sheet_names: Vec<String>,
    /// Full document snapshot when there are unsent local edits.
    pub snapshot: Option<Value>,
}

/// An in-flight job.
pub struct JobHandle {
    job_id: JobId,
    branch_id: BranchId,
    rx: oneshot::Receiver<Result<JobResult, ClientError>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Wait for the job to settle.
    pub async fn wait(self) -> Result<JobResult, ClientError> {
        self.rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }
}

/// Removes its listeners from the connector on drop.
struct ListenerGuard {
    connector: Arc<Connector>,
    events: Vec<(&'static str, ListenerId)>,
    states: Vec<ListenerId>,
}

impl ListenerGuard {
    fn new(connector: &Arc<Connector>) -> Self {
        Self {
            connector: Arc::clone(connector),
            events: Vec::new(),
            states: Vec::new(),
        }
    }

    fn on<F>(&mut self, event: &'static str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.connector.on(event, callback);
        self.events.push((event, id));
    }

    fn on_state<F>(&mut self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.connector.on_state(callback);
        self.states.push(id);
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        for (event, id) in self.events.drain(..) {
            self.connector.off(event, id);
        }
        for id in self.states.drain(..) {
            self.connector.off_state(id);
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, payload: &Value) -> Option<T> {
    match T::deserialize(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Dropping malformed '{}' event: {}", event, e);
            None
        }
    }
}

/// Decode a terminal job event. When the payload is malformed but still
/// names a job, that job is failed instead of being left pending.
fn decode_terminal<T: DeserializeOwned>(
    table: &JobTable,
    event: &str,
    payload: &Value,
) -> Option<T> {
    let e = match T::deserialize(payload) {
        Ok(value) => return Some(value),
        Err(e) => e,
    };
    let job_id = payload.get("jobId").and_then(|v| JobId::deserialize(v).ok());
    match job_id {
        Some(job_id) => {
            warn!("Malformed '{}' for job {}: {}", event, job_id.short(), e);
            table.reject(
                job_id,
                JobState::Failed,
                ClientError::BackendError {
                    message: format!("malformed {} event: {}", event, e),
                },
            );
        }
        None => warn!("Dropping malformed '{}' event without jobId: {}", event, e),
    }
    None
}

pub struct JobClient {
    connector: Arc<Connector>,
    jobs: Arc<JobTable>,
    versions: Arc<VersionStore>,
    rollback_gate: tokio::sync::Mutex<()>,
    _listeners: ListenerGuard,
}

impl JobClient {
    pub fn new(connector: Arc<Connector>, versions: Arc<VersionStore>) -> Self {
        let jobs = Arc::new(JobTable::new());
        let mut listeners = ListenerGuard::new(&connector);

        let table = Arc::clone(&jobs);
        listeners.on(events::JOB_PLANNED, move |payload| {
            let Some(event) = decode::<JobPlanned>(events::JOB_PLANNED, payload) else {
                return;
            };
            let job_id = event.job_id;
            match table.on_planned(event) {
                Some(state) => debug!("Job {} is {}", job_id.short(), state),
                None => debug!("job-planned for unknown job {}, ignoring", job_id.short()),
            }
        });

        let table = Arc::clone(&jobs);
        let store = Arc::clone(&versions);
        listeners.on(events::JOB_TASKS_EXECUTED, move |payload| {
            let Some(event) =
                decode_terminal::<JobExecuted>(&table, events::JOB_TASKS_EXECUTED, payload)
            else {
                return;
            };
            let job_id = event.job_id;
            let version = event.spread_sheet_version_id.clone();
            let lock = event.edit_lock_version.clone();
            let chat_session = event.chat_session_id.clone();
            table.resolve(event, |_| {
                let candidate = Candidate {
                    spread_sheet_version_id: version.as_ref(),
                    edit_lock_version: lock.as_ref(),
                    chat_session_id: chat_session.as_ref(),
                };
                match store.try_advance(candidate) {
                    Ok(advance) => info!("Job {} completed at {}", job_id.short(), advance.current),
                    Err(e) => warn!("Job {} completed: {}", job_id.short(), e),
                }
            });
        });

        let table = Arc::clone(&jobs);
        listeners.on(events::JOB_ERROR, move |payload| {
            if let Some(event) = decode_terminal::<JobFailed>(&table, events::JOB_ERROR, payload)
            {
                let message = event.message_or_default().to_string();
                warn!("Job {} failed: {}", event.job_id.short(), message);
                table.reject(
                    event.job_id,
                    JobState::Failed,
                    ClientError::BackendError { message },
                );
            }
        });

        let table = Arc::clone(&jobs);
        listeners.on(events::JOB_CANCELLED, move |payload| {
            if let Some(event) =
                decode_terminal::<JobCancelled>(&table, events::JOB_CANCELLED, payload)
            {
                table.reject(event.job_id, JobState::Cancelled, ClientError::JobCancelled);
            }
        });

        let table = Arc::clone(&jobs);
        listeners.on(events::JOB_TIMEOUT, move |payload| {
            if let Some(event) =
                decode_terminal::<JobTimedOut>(&table, events::JOB_TIMEOUT, payload)
            {
                table.reject(event.job_id, JobState::TimedOut, ClientError::JobTimedOut);
            }
        });

        let table = Arc::clone(&jobs);
        listeners.on_state(move |state| {
            if state == ConnectionState::Disconnected {
                let drained = table.fail_all();
                if drained > 0 {
                    warn!("Connection closed with {} pending job(s)", drained);
                }
            }
        });

        Self {
            connector,
            jobs,
            versions,
            rollback_gate: tokio::sync::Mutex::new(()),
            _listeners: listeners,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    pub async fn connect(&self, endpoint: &str) -> Result<(), ClientError> {
        self.connector.connect(endpoint).await
    }

    /// Disconnect. Every pending job is rejected with `ConnectionClosed`
    /// before this returns.
    pub fn disconnect(&self) {
        self.connector.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Build, register, and send a job. The returned handle settles on the
    /// job's terminal event.
    pub fn submit_job(&self, submission: JobSubmission) -> Result<JobHandle, ClientError> {
        if !self.connector.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let claimed = self.versions.snapshot();
        let (version, lock) = match claimed {
            Some(pair) => (
                Some(pair.spread_sheet_version_id),
                Some(pair.edit_lock_version),
            ),
            None => (None, None),
        };
        let request = Arc::new(JobRequest {
            job_id: JobId::new(),
            document_id: submission.document_id,
            chat_id: submission.chat_id,
            chat_session_id: submission.chat_session_id,
            branch_id: submission.branch_id,
            user_id: submission.user_id,
            mode: submission.mode,
            user_question_message: submission.message,
            selected_sheet_names: submission.selected_sheet_names,
            spread_sheet_version_id: version,
            edit_lock_version: lock,
            new_version_spread_sheet_data: submission.snapshot,
        });
        let job_id = request.job_id;
        let branch_id = request.branch_id;

        let rx = self.jobs.register(Arc::clone(&request));
        if let Err(e) = self.connector.send(events::JOB_SUBMIT, request.as_ref()) {
            self.jobs.remove(job_id);
            return Err(e);
        }
        info!(
            "Submitted job {} for branch {} ({})",
            job_id.short(),
            branch_id.short(),
            request.mode
        );

        Ok(JobHandle {
            job_id,
            branch_id,
            rx,
        })
    }

    /// Submit a job and wait for its terminal event.
    pub async fn execute_ai_job(&self, submission: JobSubmission) -> Result<JobResult, ClientError> {
        self.submit_job(submission)?.wait().await
    }

    /// Cancel locally. A best-effort `job-cancel` notice goes to the backend
    /// when the job was still pending.
    pub fn cancel_job(&self, job_id: JobId) -> CancelOutcome {
        let outcome = self.jobs.cancel(job_id);
        if outcome == CancelOutcome::LocallyCancelled {
            info!("Cancelled job {}", job_id.short());
            if let Err(e) = self
                .connector
                .send(events::JOB_CANCEL, &JobCancelNotice { job_id })
            {
                debug!("job-cancel notice for {} not sent: {}", job_id.short(), e);
            }
        }
        outcome
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    /// Ask the backend to undo one turn.
    ///
    /// Serialized per client. Preconditions are checked before waiting for
    /// an earlier rollback, and again once it has finished. The response
    /// listeners live only for the duration of this call.
    pub async fn rollback_message(
        &self,
        request: RollbackRequest,
    ) -> Result<RollbackResponse, ClientError> {
        self.check_rollback(request.branch_id)?;
        let _gate = self.rollback_gate.lock().await;

        let (tx, rx) = oneshot::channel::<Result<RollbackResponse, ClientError>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let branch_id = request.branch_id;
        let mut listeners = ListenerGuard::new(&self.connector);

        let reply = Arc::clone(&slot);
        listeners.on(events::ROLLBACK_RESPONSE, move |payload| {
            let settled = match RollbackResponse::deserialize(payload) {
                Ok(response) if response.branch_id.is_some_and(|b| b != branch_id) => {
                    debug!("rollback-response for another branch, ignoring");
                    return;
                }
                Ok(response) if response.success => Ok(response),
                Ok(response) => Err(ClientError::RollbackFailed {
                    message: response
                        .message
                        .unwrap_or_else(|| "rollback rejected".to_string()),
                }),
                Err(e) => {
                    warn!("Malformed '{}': {}", events::ROLLBACK_RESPONSE, e);
                    Err(ClientError::RollbackFailed {
                        message: format!("malformed {} event: {}", events::ROLLBACK_RESPONSE, e),
                    })
                }
            };
            if let Some(tx) = reply.lock().take() {
                let _ = tx.send(settled);
            }
        });

        let reply = Arc::clone(&slot);
        listeners.on(events::ROLLBACK_ERROR, move |payload| {
            let message = match RollbackError::deserialize(payload) {
                Ok(error) if error.branch_id.is_some_and(|b| b != branch_id) => {
                    debug!("rollback-error for another branch, ignoring");
                    return;
                }
                Ok(error) => error.message_or_default().to_string(),
                Err(e) => {
                    warn!("Malformed '{}': {}", events::ROLLBACK_ERROR, e);
                    format!("malformed {} event: {}", events::ROLLBACK_ERROR, e)
                }
            };
            if let Some(tx) = reply.lock().take() {
                let _ = tx.send(Err(ClientError::RollbackFailed { message }));
            }
        });

        // Any transition after this point means the request's link is gone,
        // even if a reconnect follows before this task is polled again.
        let reply = Arc::clone(&slot);
        listeners.on_state(move |state| {
            if state != ConnectionState::Connected
                && let Some(tx) = reply.lock().take()
            {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
            }
        });

        self.check_rollback(branch_id)?;
        self.connector.send(events::ROLLBACK_MESSAGE, &request)?;
        info!("Requested rollback of branch {}", branch_id.short());

        let outcome = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        drop(listeners);

        let response = outcome?;
        if let Some(pair) = response.restored_versions() {
            self.versions.confirm_rollback(pair);
        }
        info!("Rolled back branch {}", branch_id.short());
        Ok(response)
    }

    fn check_rollback(&self, branch_id: BranchId) -> Result<(), ClientError> {
        if !self.connector.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if self.jobs.has_branch(branch_id) {
            return Err(ClientError::JobInFlight { branch_id });
        }
        Ok(())
    }
}
