//! Wire protocol between the client and the AI backend.
//!
//! Every message is an [`Envelope`]: an event name plus a JSON payload. Payload
//! field names are camelCase. The transport guarantees per-connection ordering
//! and nothing else; correlation happens on `jobId`.
//!
//! ```text
//!   client                                   backend
//!     │ job-submit {jobId, branchId, ...}  ──▶  │
//!     │ ◀── job-planned {jobId, plan}           │  (zero or more)
//!     │ ◀── job-tasks-executed | job-error |    │  (exactly one terminal)
//!     │     job-cancelled | job-timeout         │
//!     │                                         │
//!     │ rollback-message {branchId, ...}   ──▶  │
//!     │ ◀── rollback-response | rollback-error  │
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BranchId, ChatId, ChatSessionId, DocumentId, JobId, UserId};
use crate::job::JobMode;
use crate::version::{VersionPair, VersionToken};

/// Event names, both directions.
pub mod events {
    // client → backend
    pub const JOB_SUBMIT: &str = "job-submit";
    pub const JOB_CANCEL: &str = "job-cancel";
    pub const ROLLBACK_MESSAGE: &str = "rollback-message";

    // backend → client
    pub const JOB_PLANNED: &str = "job-planned";
    pub const JOB_TASKS_EXECUTED: &str = "job-tasks-executed";
    pub const JOB_ERROR: &str = "job-error";
    pub const JOB_CANCELLED: &str = "job-cancelled";
    pub const JOB_TIMEOUT: &str = "job-timeout";
    pub const ROLLBACK_RESPONSE: &str = "rollback-response";
    pub const ROLLBACK_ERROR: &str = "rollback-error";
}

/// One framed message on the connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ============================================================================
// Client → backend
// ============================================================================

/// Outgoing job request (`job-submit`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: JobId,
    pub document_id: DocumentId,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_session_id: Option<ChatSessionId>,
    pub branch_id: BranchId,
    pub user_id: UserId,
    pub mode: JobMode,
    pub user_question_message: String,
    #[serde(default)]
    pub selected_sheet_names: Vec<String>,
    /// Optimistic claim: the document version the client believes is current.
    #[serde(default)]
    pub spread_sheet_version_id: Option<VersionToken>,
    /// Optimistic claim: the lock issued with that version.
    #[serde(default)]
    pub edit_lock_version: Option<VersionToken>,
    /// Full document snapshot, present only when the client has unsent edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version_spread_sheet_data: Option<Value>,
}

impl JobRequest {
    /// The version pair claimed by this request, if the client had one.
    pub fn claimed_versions(&self) -> Option<VersionPair> {
        VersionPair::from_parts(
            self.spread_sheet_version_id.as_ref(),
            self.edit_lock_version.as_ref(),
        )
    }
}

/// Best-effort cancellation notice (`job-cancel`). No reply is expected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCancelNotice {
    pub job_id: JobId,
}

/// Rollback request (`rollback-message`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub branch_id: BranchId,
    pub chat_id: ChatId,
    pub user_id: UserId,
}

// ============================================================================
// Backend → client
// ============================================================================

/// `job-planned`: the backend announces how it will execute a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPlanned {
    pub job_id: JobId,
    #[serde(default)]
    pub plan: Value,
}

/// `job-tasks-executed`: terminal success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecuted {
    pub job_id: JobId,
    #[serde(default)]
    pub chat_session_id: Option<ChatSessionId>,
    /// Opaque to the job layer; decoded by the command router.
    #[serde(default)]
    pub edit_commands: Value,
    #[serde(default)]
    pub spread_sheet_version_id: Option<VersionToken>,
    #[serde(default)]
    pub edit_lock_version: Option<VersionToken>,
    /// Assistant reply text shown in the chat panel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `job-error`: terminal failure with the backend's message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailed {
    pub job_id: JobId,
    /// Absent or `null` when the backend had nothing to say.
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobFailed {
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("job failed")
    }
}

/// `job-cancelled`: terminal, backend-side cancellation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCancelled {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `job-timeout`: terminal, backend-enforced deadline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTimedOut {
    pub job_id: JobId,
}

/// `rollback-response`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub spread_sheet_version_id: Option<VersionToken>,
    #[serde(default)]
    pub edit_lock_version: Option<VersionToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RollbackResponse {
    /// The restored version pair, when the backend sent a complete one.
    pub fn restored_versions(&self) -> Option<VersionPair> {
        VersionPair::from_parts(
            self.spread_sheet_version_id.as_ref(),
            self.edit_lock_version.as_ref(),
        )
    }
}

/// `rollback-error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RollbackError {
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("rollback failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request(snapshot: Option<Value>) -> JobRequest {
        JobRequest {
            job_id: JobId::new(),
            document_id: "doc-1".into(),
            chat_id: "chat-1".into(),
            chat_session_id: None,
            branch_id: BranchId::new(),
            user_id: "u1".into(),
            mode: JobMode::Agent,
            user_question_message: "sum column B".to_string(),
            selected_sheet_names: vec!["Sheet1".to_string()],
            spread_sheet_version_id: Some("v1".into()),
            edit_lock_version: Some("L1".into()),
            new_version_spread_sheet_data: snapshot,
        }
    }

    #[test]
    fn test_request_omits_snapshot_when_clean() {
        let json = serde_json::to_value(sample_request(None)).unwrap();
        assert!(json.get("newVersionSpreadSheetData").is_none());
        assert!(json.get("chatSessionId").is_none());
        assert_eq!(json["spreadSheetVersionId"], "v1");
        assert_eq!(json["editLockVersion"], "L1");
        assert_eq!(json["selectedSheetNames"], json!(["Sheet1"]));
        assert_eq!(json["mode"], "agent");
    }

    #[test]
    fn test_request_carries_snapshot_when_dirty() {
        let json = serde_json::to_value(sample_request(Some(json!({"sheets": []})))).unwrap();
        assert_eq!(json["newVersionSpreadSheetData"], json!({"sheets": []}));
    }

    #[test]
    fn test_executed_tolerates_missing_versions() {
        let job_id = JobId::new();
        let executed: JobExecuted = serde_json::from_value(json!({
            "jobId": job_id,
            "chatSessionId": "cs-1",
            "editCommands": {"schema": "sheet-edit/v1", "commands": []},
            "spreadSheetVersionId": "v2",
        }))
        .unwrap();
        assert_eq!(executed.job_id, job_id);
        assert_eq!(executed.edit_lock_version, None);
    }

    #[test]
    fn test_failed_accepts_error_alias() {
        let job_id = JobId::new();
        let failed: JobFailed =
            serde_json::from_value(json!({"jobId": job_id, "error": "lock mismatch"})).unwrap();
        assert_eq!(failed.message_or_default(), "lock mismatch");
    }

    #[test]
    fn test_failure_messages_tolerate_null_and_absence() {
        let job_id = JobId::new();
        for payload in [json!({"jobId": job_id, "message": null}), json!({"jobId": job_id})] {
            let failed: JobFailed = serde_json::from_value(payload).unwrap();
            assert_eq!(failed.message, None);
            assert_eq!(failed.message_or_default(), "job failed");
        }

        let error: RollbackError = serde_json::from_value(json!({"message": null})).unwrap();
        assert_eq!(error.message_or_default(), "rollback failed");
    }

    #[test]
    fn test_rollback_response_restored_versions() {
        let resp: RollbackResponse = serde_json::from_value(json!({
            "success": true,
            "spreadSheetVersionId": "v1",
            "editLockVersion": "L9",
        }))
        .unwrap();
        assert_eq!(resp.restored_versions(), Some(VersionPair::new("v1", "L9")));

        let bare: RollbackResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(bare.restored_versions(), None);
    }

    #[test]
    fn test_envelope_defaults_missing_payload_to_null() {
        let env: Envelope = serde_json::from_str(r#"{"event":"job-timeout"}"#).unwrap();
        assert_eq!(env.event, events::JOB_TIMEOUT);
        assert!(env.payload.is_null());
    }
}
