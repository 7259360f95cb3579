//! The document collaborator seam.
//!
//! The command router and the agent session only talk to the spreadsheet
//! through [`SheetDocument`]. The host application implements it over its
//! rendering widget; [`Workbook`](crate::Workbook) is the in-memory
//! implementation used by the CLI and tests.

use serde_json::Value;

use crate::command::{ApplyError, EditCommand};

pub trait SheetDocument {
    /// Apply one AI-originated command. Must not mark the document dirty.
    fn apply_command(&mut self, command: &EditCommand) -> Result<(), ApplyError>;

    /// Whether there are local edits not yet included in a submitted snapshot.
    fn is_dirty(&self) -> bool;

    /// Forget all dirty markers.
    fn clear_dirty(&mut self);

    /// Full document snapshot for `newVersionSpreadSheetData`.
    fn snapshot(&self) -> Value;

    /// Sheet names in display order.
    fn sheet_names(&self) -> Vec<String>;
}
