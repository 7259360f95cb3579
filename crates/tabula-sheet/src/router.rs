//! Command application router.
//!
//! Turns a completed job's `editCommands` payload into mutations on a
//! [`SheetDocument`].
//!
//! # Rules
//!
//! - **Deterministic**: commands address cells absolutely and are applied in
//!   payload order, so equal documents + equal payload → equal results.
//! - **Idempotent per job**: a job id whose payload was already applied is
//!   skipped (`AlreadyApplied`). The memory of applied ids is bounded.
//! - **Fail soft**: a command naming a missing sheet or an out-of-bounds range
//!   is skipped, the rest still apply, and one aggregated warning is logged.
//!   A command that does not decode at all (malformed address, unknown `op`)
//!   is skipped the same way.
//! - After applying, the document's dirty markers are cleared.

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::Value;
use tabula_types::JobId;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::command::{ApplyError, CommandBatch, CommandSchema, EditCommand};
use crate::document::SheetDocument;

/// How many applied job ids the router remembers for duplicate detection.
pub const MAX_APPLIED_JOBS: usize = 256;

/// Schema tags this router understands.
const KNOWN_SCHEMAS: &[&str] = &["sheet-edit/v1"];

/// Payload envelope. Commands stay raw so each one decodes on its own.
#[derive(Deserialize)]
struct RawBatch {
    #[allow(dead_code)]
    schema: CommandSchema,
    #[serde(default)]
    commands: Vec<Value>,
}

/// Payload-level failure. Individual command failures never surface here.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("unknown edit-command schema '{0}'")]
    UnknownSchema(String),
    #[error("failed to decode edit commands: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What happened to a payload as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Commands were applied (some may have been skipped).
    Applied,
    /// The payload carried no commands.
    Empty,
    /// This job's payload was applied before; nothing was done.
    AlreadyApplied,
}

/// A command that could not be resolved against the current document.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCommand {
    /// Position in the payload's command list.
    pub index: usize,
    /// The `op` tag as sent; `?` when the element had none.
    pub op: String,
    pub sheet: String,
    pub reason: ApplyError,
}

/// One element of a decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadEntry {
    Command(EditCommand),
    /// The element did not decode into a command. `op` and `sheet` are
    /// whatever could be read off the raw element, for reporting.
    Malformed {
        op: String,
        sheet: String,
        reason: String,
    },
}

impl PayloadEntry {
    fn decode(raw: &Value) -> Self {
        match EditCommand::deserialize(raw) {
            Ok(command) => PayloadEntry::Command(command),
            Err(e) => {
                let field = |key: &str| raw.get(key).and_then(Value::as_str);
                PayloadEntry::Malformed {
                    op: field("op").unwrap_or("?").to_string(),
                    sheet: field("sheet")
                        .or_else(|| field("name"))
                        .or_else(|| field("from"))
                        .unwrap_or_default()
                        .to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Result of applying one job's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub job_id: JobId,
    pub outcome: ApplyOutcome,
    pub applied: usize,
    pub skipped: Vec<SkippedCommand>,
}

impl ApplyReport {
    fn untouched(job_id: JobId, outcome: ApplyOutcome) -> Self {
        Self {
            job_id,
            outcome,
            applied: 0,
            skipped: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Applies job payloads to a document and remembers which jobs it has applied.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    applied: VecDeque<JobId>,
    capacity: usize,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::with_capacity(MAX_APPLIED_JOBS)
    }

    /// A router remembering at most `capacity` applied job ids (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            applied: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn has_applied(&self, job_id: &JobId) -> bool {
        self.applied.contains(job_id)
    }

    /// Decode an `editCommands` payload.
    ///
    /// `null`, `{}` and an empty array mean "no commands" and decode to `None`.
    /// Only the envelope can fail here; each command decodes separately and
    /// a bad one becomes [`PayloadEntry::Malformed`].
    pub fn decode(payload: &Value) -> Result<Option<Vec<PayloadEntry>>, RouterError> {
        match payload {
            Value::Null => return Ok(None),
            Value::Array(items) if items.is_empty() => return Ok(None),
            Value::Object(map) if map.is_empty() => return Ok(None),
            Value::Object(map) => {
                if let Some(schema) = map.get("schema").and_then(Value::as_str)
                    && !KNOWN_SCHEMAS.contains(&schema)
                {
                    return Err(RouterError::UnknownSchema(schema.to_string()));
                }
            }
            _ => {}
        }
        let raw = RawBatch::deserialize(payload)?;
        if raw.commands.is_empty() {
            return Ok(None);
        }
        Ok(Some(raw.commands.iter().map(PayloadEntry::decode).collect()))
    }

    /// Decode and apply one job's payload.
    ///
    /// A decode failure leaves the document and its dirty markers untouched
    /// and does not mark the job as applied.
    pub fn apply<D: SheetDocument + ?Sized>(
        &mut self,
        doc: &mut D,
        job_id: JobId,
        payload: &Value,
    ) -> Result<ApplyReport, RouterError> {
        if self.has_applied(&job_id) {
            debug!("Edit commands for job {} already applied, skipping", job_id);
            return Ok(ApplyReport::untouched(job_id, ApplyOutcome::AlreadyApplied));
        }

        match Self::decode(payload)? {
            Some(entries) => Ok(self.apply_entries(doc, job_id, &entries)),
            None => {
                trace!("Job {} returned no edit commands", job_id);
                self.remember(job_id);
                doc.clear_dirty();
                Ok(ApplyReport::untouched(job_id, ApplyOutcome::Empty))
            }
        }
    }

    /// Apply an already decoded batch.
    pub fn apply_batch<D: SheetDocument + ?Sized>(
        &mut self,
        doc: &mut D,
        job_id: JobId,
        batch: &CommandBatch,
    ) -> ApplyReport {
        let entries: Vec<PayloadEntry> = batch
            .commands
            .iter()
            .cloned()
            .map(PayloadEntry::Command)
            .collect();
        self.apply_entries(doc, job_id, &entries)
    }

    fn apply_entries<D: SheetDocument + ?Sized>(
        &mut self,
        doc: &mut D,
        job_id: JobId,
        entries: &[PayloadEntry],
    ) -> ApplyReport {
        if self.has_applied(&job_id) {
            return ApplyReport::untouched(job_id, ApplyOutcome::AlreadyApplied);
        }

        let mut applied = 0;
        let mut skipped = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let command = match entry {
                PayloadEntry::Command(command) => command,
                PayloadEntry::Malformed { op, sheet, reason } => {
                    skipped.push(SkippedCommand {
                        index,
                        op: op.clone(),
                        sheet: sheet.clone(),
                        reason: ApplyError::Malformed(reason.clone()),
                    });
                    continue;
                }
            };
            match doc.apply_command(command) {
                Ok(()) => {
                    trace!("Applied {} on '{}'", command.op(), command.sheet());
                    applied += 1;
                }
                Err(reason) => skipped.push(SkippedCommand {
                    index,
                    op: command.op().to_string(),
                    sheet: command.sheet().to_string(),
                    reason,
                }),
            }
        }

        if !skipped.is_empty() {
            let summary: Vec<String> = skipped
                .iter()
                .map(|s| format!("#{} {}: {}", s.index, s.op, s.reason))
                .collect();
            warn!(
                "Job {}: skipped {} of {} edit commands ({})",
                job_id,
                skipped.len(),
                entries.len(),
                summary.join("; ")
            );
        }

        self.remember(job_id);
        doc.clear_dirty();

        debug!("Job {}: applied {} edit commands", job_id, applied);
        ApplyReport {
            job_id,
            outcome: ApplyOutcome::Applied,
            applied,
            skipped,
        }
    }

    fn remember(&mut self, job_id: JobId) {
        if self.applied.len() >= self.capacity {
            self.applied.pop_front();
        }
        self.applied.push_back(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CellValue, EditCommand};
    use crate::workbook::Workbook;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "schema": "sheet-edit/v1",
            "commands": [
                {"op": "setCell", "sheet": "Sales", "cell": "A1", "value": "Region"},
                {"op": "setRange", "sheet": "Sales", "range": "A2:B3",
                 "values": [["North", 10], ["South", 20]]},
                {"op": "insertRows", "sheet": "Sales", "at": 1, "count": 1},
                {"op": "setCell", "sheet": "Sales", "cell": "B5", "value": "=SUM(B3:B4)"},
                {"op": "addSheet", "name": "Summary"},
                {"op": "setCell", "sheet": "Summary", "cell": "A1", "value": "=Sales!B5"}
            ]
        })
    }

    // =========================================================================
    // Determinism
    // =========================================================================

    #[test]
    fn test_same_payload_on_equal_documents_gives_equal_results() {
        let mut a = Workbook::with_sheets(["Sales"]);
        let mut b = Workbook::with_sheets(["Sales"]);
        let job = JobId::new();

        let ra = CommandRouter::new().apply(&mut a, job, &payload()).unwrap();
        let rb = CommandRouter::new().apply(&mut b, job, &payload()).unwrap();

        assert_eq!(ra, rb);
        assert_eq!(a, b);
        assert_eq!(a.cell("Sales", "A4"), CellValue::from("South"));
        assert_eq!(a.cell("Summary", "A1"), CellValue::from("=Sales!B5"));
    }

    #[test]
    fn test_unrelated_local_edit_does_not_change_command_targets() {
        let mut a = Workbook::with_sheets(["Sales"]);
        let mut b = Workbook::with_sheets(["Sales"]);
        b.edit(&EditCommand::SetCell {
            sheet: "Sales".into(),
            cell: "Z900".parse().unwrap(),
            value: "note".into(),
        })
        .unwrap();

        let job = JobId::new();
        CommandRouter::new().apply(&mut a, job, &payload()).unwrap();
        CommandRouter::new().apply(&mut b, job, &payload()).unwrap();

        assert_eq!(a.cell("Sales", "B5"), b.cell("Sales", "B5"));
        assert_eq!(a.cell("Sales", "A3"), b.cell("Sales", "A3"));
    }

    // =========================================================================
    // Idempotence
    // =========================================================================

    #[test]
    fn test_reapplying_same_job_is_noop() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        let mut router = CommandRouter::new();
        let job = JobId::new();

        router.apply(&mut wb, job, &payload()).unwrap();
        let version = wb.version();

        let again = router.apply(&mut wb, job, &payload()).unwrap();
        assert_eq!(again.outcome, ApplyOutcome::AlreadyApplied);
        assert_eq!(again.applied, 0);
        assert_eq!(wb.version(), version);
    }

    #[test]
    fn test_applied_memory_is_bounded() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        let mut router = CommandRouter::with_capacity(2);
        let jobs: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for job in &jobs {
            router.apply(&mut wb, *job, &Value::Null).unwrap();
        }
        assert!(!router.has_applied(&jobs[0]));
        assert!(router.has_applied(&jobs[1]));
        assert!(router.has_applied(&jobs[2]));
    }

    // =========================================================================
    // Fail soft
    // =========================================================================

    #[test]
    fn test_unresolvable_commands_are_skipped_and_rest_applied() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        let report = CommandRouter::new()
            .apply(
                &mut wb,
                JobId::new(),
                &json!({
                    "schema": "sheet-edit/v1",
                    "commands": [
                        {"op": "setCell", "sheet": "Deleted", "cell": "A1", "value": 1},
                        {"op": "setCell", "sheet": "Sales", "cell": "A1", "value": 2},
                        {"op": "clearRange", "sheet": "Sales", "range": "A1:ZZ9"},
                        {"op": "setCell", "sheet": "Sales", "cell": "B1", "value": 3}
                    ]
                }),
            )
            .unwrap();

        assert_eq!(report.outcome, ApplyOutcome::Applied);
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].index, 0);
        assert_eq!(report.skipped[0].reason, ApplyError::MissingSheet("Deleted".into()));
        assert_eq!(report.skipped[1].op, "clearRange");
        assert!(!report.is_clean());

        assert_eq!(wb.cell("Sales", "A1"), CellValue::Number(2.0));
        assert_eq!(wb.cell("Sales", "B1"), CellValue::Number(3.0));
    }

    // =========================================================================
    // Decoding and dirty markers
    // =========================================================================

    #[test]
    fn test_applying_clears_dirty_markers() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        wb.edit(&EditCommand::SetCell {
            sheet: "Sales".into(),
            cell: "C1".parse().unwrap(),
            value: 1.0.into(),
        })
        .unwrap();
        assert!(wb.is_dirty());

        CommandRouter::new().apply(&mut wb, JobId::new(), &payload()).unwrap();
        assert!(!wb.is_dirty());
    }

    #[test]
    fn test_empty_payloads() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        let mut router = CommandRouter::new();
        for empty in [Value::Null, json!([]), json!({}), json!({"schema": "sheet-edit/v1"})] {
            let report = router.apply(&mut wb, JobId::new(), &empty).unwrap();
            assert_eq!(report.outcome, ApplyOutcome::Empty);
        }
        assert_eq!(wb.version(), 0);
    }

    #[test]
    fn test_unknown_schema_leaves_document_untouched() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        wb.edit(&EditCommand::AddSheet { name: "Local".into() }).unwrap();
        let mut router = CommandRouter::new();
        let job = JobId::new();

        let err = router
            .apply(&mut wb, job, &json!({"schema": "chart/v2", "commands": []}))
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownSchema(ref s) if s == "chart/v2"));
        assert!(wb.is_dirty());
        assert!(!router.has_applied(&job));
    }

    #[test]
    fn test_malformed_commands_are_skipped_and_rest_applied() {
        let mut wb = Workbook::with_sheets(["Sales"]);
        let report = CommandRouter::new()
            .apply(
                &mut wb,
                JobId::new(),
                &json!({
                    "schema": "sheet-edit/v1",
                    "commands": [
                        {"op": "setCell", "sheet": "Sales", "cell": "A1", "value": 2},
                        {"op": "clearRange", "sheet": "Sales", "range": "A0:B2"},
                        {"op": "explode", "sheet": "Sales"},
                        {"sheet": "Sales", "cell": "C1"},
                        {"op": "setCell", "sheet": "Sales", "cell": "B1", "value": 3}
                    ]
                }),
            )
            .unwrap();

        assert_eq!(report.outcome, ApplyOutcome::Applied);
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(report.skipped[0].op, "clearRange");
        assert_eq!(report.skipped[0].sheet, "Sales");
        assert!(matches!(
            report.skipped[0].reason,
            ApplyError::Malformed(ref m) if m.contains("A0")
        ));
        assert_eq!(report.skipped[1].op, "explode");
        assert_eq!(report.skipped[2].op, "?");

        assert_eq!(wb.cell("Sales", "A1"), CellValue::Number(2.0));
        assert_eq!(wb.cell("Sales", "B1"), CellValue::Number(3.0));
    }

    #[test]
    fn test_malformed_envelope_is_decode_error() {
        let err = CommandRouter::decode(&json!({"schema": "sheet-edit/v1", "commands": "setCell"}))
            .unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));

        let err = CommandRouter::decode(&json!({"commands": [{"op": "addSheet", "name": "X"}]}))
            .unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));
    }

    #[test]
    fn test_decode_keeps_payload_order() {
        let entries = CommandRouter::decode(&payload()).unwrap().unwrap();
        assert_eq!(entries.len(), 6);
        assert!(matches!(&entries[4], PayloadEntry::Command(c) if c.op() == "addSheet"));
    }
}
