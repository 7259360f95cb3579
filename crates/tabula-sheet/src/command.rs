//! Edit commands produced by AI jobs.
//!
//! A job result carries an `editCommands` payload keyed by a schema tag:
//!
//! ```json
//! { "schema": "sheet-edit/v1",
//!   "commands": [
//!     { "op": "setCell", "sheet": "Sheet1", "cell": "B2", "value": 42 },
//!     { "op": "insertRows", "sheet": "Sheet1", "at": 3, "count": 2 }
//!   ] }
//! ```
//!
//! Every command addresses cells and ranges absolutely, never relative to a
//! diff, so replaying a batch against equal documents gives equal results.

use serde::{Deserialize, Serialize};

use crate::address::{CellRef, Range};

/// Schema tag of an edit-command payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandSchema {
    #[serde(rename = "sheet-edit/v1")]
    SheetEditV1,
}

/// A cell value.
///
/// Formulas are stored as text starting with `=`; evaluation belongs to the
/// rendering widget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Text(t) if t.starts_with('='))
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// One absolute mutation of the workbook.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EditCommand {
    /// Write one cell.
    SetCell {
        sheet: String,
        cell: CellRef,
        value: CellValue,
    },
    /// Write a row-major block of values starting at the range's top-left.
    /// `values` must match the range's dimensions.
    SetRange {
        sheet: String,
        range: Range,
        values: Vec<Vec<CellValue>>,
    },
    /// Clear every cell in a range.
    ClearRange { sheet: String, range: Range },
    /// Insert `count` empty rows before zero-based row `at`.
    InsertRows { sheet: String, at: u32, count: u32 },
    /// Delete `count` rows starting at zero-based row `at`.
    DeleteRows { sheet: String, at: u32, count: u32 },
    /// Insert `count` empty columns before zero-based column `at`.
    InsertColumns { sheet: String, at: u32, count: u32 },
    /// Delete `count` columns starting at zero-based column `at`.
    DeleteColumns { sheet: String, at: u32, count: u32 },
    AddSheet { name: String },
    RemoveSheet { name: String },
    RenameSheet { from: String, to: String },
}

impl EditCommand {
    /// The `op` tag, for logging.
    pub fn op(&self) -> &'static str {
        match self {
            EditCommand::SetCell { .. } => "setCell",
            EditCommand::SetRange { .. } => "setRange",
            EditCommand::ClearRange { .. } => "clearRange",
            EditCommand::InsertRows { .. } => "insertRows",
            EditCommand::DeleteRows { .. } => "deleteRows",
            EditCommand::InsertColumns { .. } => "insertColumns",
            EditCommand::DeleteColumns { .. } => "deleteColumns",
            EditCommand::AddSheet { .. } => "addSheet",
            EditCommand::RemoveSheet { .. } => "removeSheet",
            EditCommand::RenameSheet { .. } => "renameSheet",
        }
    }

    /// The sheet this command targets.
    pub fn sheet(&self) -> &str {
        match self {
            EditCommand::SetCell { sheet, .. }
            | EditCommand::SetRange { sheet, .. }
            | EditCommand::ClearRange { sheet, .. }
            | EditCommand::InsertRows { sheet, .. }
            | EditCommand::DeleteRows { sheet, .. }
            | EditCommand::InsertColumns { sheet, .. }
            | EditCommand::DeleteColumns { sheet, .. } => sheet,
            EditCommand::AddSheet { name } | EditCommand::RemoveSheet { name } => name,
            EditCommand::RenameSheet { from, .. } => from,
        }
    }
}

/// A decoded `editCommands` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub schema: CommandSchema,
    #[serde(default)]
    pub commands: Vec<EditCommand>,
}

impl CommandBatch {
    pub fn new(commands: Vec<EditCommand>) -> Self {
        Self {
            schema: CommandSchema::SheetEditV1,
            commands,
        }
    }
}

/// Why a single command could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("sheet '{0}' does not exist")]
    MissingSheet(String),
    #[error("sheet '{0}' already exists")]
    SheetExists(String),
    #[error("{target} is outside sheet '{sheet}' ({rows}x{cols})")]
    OutOfBounds {
        sheet: String,
        target: String,
        rows: u32,
        cols: u32,
    },
    #[error("range {range} expects {expected_rows}x{expected_cols} values, got {rows}x{cols}")]
    ShapeMismatch {
        range: String,
        expected_rows: u32,
        expected_cols: u32,
        rows: u32,
        cols: u32,
    },
    #[error("invalid command: {0}")]
    Invalid(String),
    #[error("malformed command: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_batch() {
        let batch: CommandBatch = serde_json::from_value(json!({
            "schema": "sheet-edit/v1",
            "commands": [
                {"op": "setCell", "sheet": "Sheet1", "cell": "B2", "value": 42},
                {"op": "setRange", "sheet": "Sheet1", "range": "A1:B1", "values": [["x", true]]},
                {"op": "clearRange", "sheet": "Sheet1", "range": "C1:C9"},
                {"op": "renameSheet", "from": "Sheet1", "to": "Budget"}
            ]
        }))
        .unwrap();

        assert_eq!(batch.schema, CommandSchema::SheetEditV1);
        assert_eq!(batch.commands.len(), 4);
        assert_eq!(
            batch.commands[0],
            EditCommand::SetCell {
                sheet: "Sheet1".into(),
                cell: CellRef::new(1, 1),
                value: CellValue::Number(42.0),
            }
        );
        assert_eq!(batch.commands[3].op(), "renameSheet");
        assert_eq!(batch.commands[3].sheet(), "Sheet1");
    }

    #[test]
    fn test_unknown_schema_is_rejected() {
        let result: Result<CommandBatch, _> =
            serde_json::from_value(json!({"schema": "sheet-edit/v9", "commands": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_cell_value_untagged() {
        let values: Vec<CellValue> =
            serde_json::from_value(json!([null, true, 1.5, "=SUM(A1:A3)", "plain"])).unwrap();
        assert_eq!(values[0], CellValue::Empty);
        assert_eq!(values[1], CellValue::Bool(true));
        assert_eq!(values[2], CellValue::Number(1.5));
        assert!(values[3].is_formula());
        assert!(!values[4].is_formula());
    }
}
