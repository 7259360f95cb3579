//! Agent session: one document, one chat, one job client.
//!
//! [`AgentSession`] is the composition root. It owns the document and the
//! command router, shares the [`JobClient`] (and through it the connector and
//! version store), and drives each user turn through its lifecycle:
//!
//! 1. `submit_turn` mints a branch, attaches a snapshot if the document is
//!    dirty, and submits the job.
//! 2. The caller awaits the [`TurnTicket`] without borrowing the session, so
//!    it can still `cancel_turn` meanwhile.
//! 3. `complete_turn` records the outcome and routes the edit commands into
//!    the document.

use std::sync::Arc;

use tabula_sheet::{ApplyReport, CommandRouter, SheetDocument};
use tabula_types::{
    BranchId, ChatId, ChatSessionId, DocumentId, JobId, JobMode, RollbackRequest,
    RollbackResponse, UserId, VersionPair,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::ClientError;
use crate::client::{JobClient, JobHandle, JobSubmission};
use crate::jobs::{CancelOutcome, JobResult};
use crate::turns::{TurnError, TurnManager, TurnState};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Turn(#[from] TurnError),
}

/// A submitted turn. Await it with [`TurnTicket::wait`].
pub struct TurnTicket {
    branch_id: BranchId,
    handle: JobHandle,
}

impl TurnTicket {
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn job_id(&self) -> JobId {
        self.handle.job_id()
    }

    pub async fn wait(self) -> TurnResult {
        TurnResult {
            branch_id: self.branch_id,
            result: self.handle.wait().await,
        }
    }
}

/// A settled job, not yet applied to the document.
pub struct TurnResult {
    pub branch_id: BranchId,
    pub result: Result<JobResult, ClientError>,
}

/// A completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub branch_id: BranchId,
    pub job: JobResult,
    /// `None` when the edit-command payload itself was unusable.
    pub report: Option<ApplyReport>,
}

pub struct AgentSession<D: SheetDocument> {
    client: Arc<JobClient>,
    turns: TurnManager,
    router: CommandRouter,
    document: D,
    document_id: DocumentId,
    chat_id: ChatId,
    user_id: UserId,
    chat_session_id: Option<ChatSessionId>,
    mode: JobMode,
}

impl<D: SheetDocument> AgentSession<D> {
    pub fn new(
        client: Arc<JobClient>,
        document: D,
        document_id: DocumentId,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Self {
        Self {
            client,
            turns: TurnManager::new(),
            router: CommandRouter::new(),
            document,
            document_id,
            chat_id,
            user_id,
            chat_session_id: None,
            mode: JobMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_router(mut self, router: CommandRouter) -> Self {
        self.router = router;
        self
    }

    /// Seed the version store with the pair the document was opened at.
    pub fn open(&self, versions: VersionPair) {
        self.client.versions().load_initial(versions);
    }

    pub fn client(&self) -> &Arc<JobClient> {
        &self.client
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Local (user) edits go through here.
    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn turns(&self) -> &TurnManager {
        &self.turns
    }

    pub fn chat_session_id(&self) -> Option<&ChatSessionId> {
        self.chat_session_id.as_ref()
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Submit a user message as a new turn.
    ///
    /// With no `selected_sheets`, every sheet of the document is selected.
    pub fn submit_turn(
        &mut self,
        message: &str,
        selected_sheets: Vec<String>,
    ) -> Result<TurnTicket, SessionError> {
        let branch_id = self.turns.draft(message);

        let snapshot = self.document.is_dirty().then(|| self.document.snapshot());
        let sent_snapshot = snapshot.is_some();
        let selected_sheet_names = if selected_sheets.is_empty() {
            self.document.sheet_names()
        } else {
            selected_sheets
        };

        let submission = JobSubmission {
            document_id: self.document_id.clone(),
            chat_id: self.chat_id.clone(),
            chat_session_id: self.chat_session_id.clone(),
            branch_id,
            user_id: self.user_id.clone(),
            mode: self.mode,
            message: message.to_string(),
            selected_sheet_names,
            snapshot,
        };

        let handle = match self.client.submit_job(submission) {
            Ok(handle) => handle,
            Err(e) => {
                self.turns.mark_failed(branch_id)?;
                return Err(e.into());
            }
        };
        if sent_snapshot {
            self.document.clear_dirty();
        }
        self.turns.mark_submitted(branch_id, handle.job_id())?;

        Ok(TurnTicket { branch_id, handle })
    }

    /// Record a settled turn and apply its edit commands.
    pub fn complete_turn(&mut self, settled: TurnResult) -> Result<TurnOutcome, SessionError> {
        let TurnResult { branch_id, result } = settled;
        let job = match result {
            Ok(job) => job,
            Err(e) => {
                self.turns.mark_failed(branch_id)?;
                return Err(e.into());
            }
        };
        self.turns.mark_completed(branch_id)?;

        if let Some(chat_session_id) = &job.chat_session_id
            && !chat_session_id.is_blank()
        {
            self.chat_session_id = Some(chat_session_id.clone());
        }

        let report = match self
            .router
            .apply(&mut self.document, job.job_id, &job.edit_commands)
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Job {}: edit commands not applied: {}", job.job_id.short(), e);
                None
            }
        };

        Ok(TurnOutcome {
            branch_id,
            job,
            report,
        })
    }

    /// Submit, wait, and complete in one call.
    pub async fn run_turn(
        &mut self,
        message: &str,
        selected_sheets: Vec<String>,
    ) -> Result<TurnOutcome, SessionError> {
        let ticket = self.submit_turn(message, selected_sheets)?;
        let settled = ticket.wait().await;
        self.complete_turn(settled)
    }

    /// Cancel the job of a submitted turn.
    pub fn cancel_turn(&self, branch_id: BranchId) -> Result<CancelOutcome, SessionError> {
        let turn = self
            .turns
            .get(branch_id)
            .ok_or(TurnError::UnknownBranch(branch_id))?;
        match (turn.state, turn.job_id) {
            (TurnState::Submitted, Some(job_id)) => Ok(self.client.cancel_job(job_id)),
            _ => Ok(CancelOutcome::NotPending),
        }
    }

    /// Undo a completed turn on the backend.
    pub async fn rollback_turn(
        &self,
        branch_id: BranchId,
    ) -> Result<RollbackResponse, SessionError> {
        self.turns.begin_rollback(branch_id)?;

        let request = RollbackRequest {
            branch_id,
            chat_id: self.chat_id.clone(),
            user_id: self.user_id.clone(),
        };
        match self.client.rollback_message(request).await {
            Ok(response) => {
                self.turns.finish_rollback(branch_id, true)?;
                info!("Turn {} rolled back", branch_id.short());
                Ok(response)
            }
            Err(e) => {
                self.turns.finish_rollback(branch_id, false)?;
                Err(e.into())
            }
        }
    }
}
