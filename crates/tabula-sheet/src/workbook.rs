//! In-memory workbook: ordered sheets of sparse cells plus dirty tracking.
//!
//! Two mutation paths share the same command vocabulary:
//!
//! - [`Workbook::edit`] is the *user* path. It applies the command and marks
//!   the touched cells (or the structure) dirty.
//! - [`SheetDocument::apply_command`] is the *AI* path. It applies the command
//!   without marking anything; the router clears dirty markers afterwards.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{CellRef, MAX_COLS, MAX_ROWS, Range};
use crate::command::{ApplyError, CellValue, EditCommand};
use crate::document::SheetDocument;

/// Row count of a freshly added sheet.
pub const DEFAULT_ROWS: u32 = 1000;

/// Column count of a freshly added sheet (`A` through `Z`).
pub const DEFAULT_COLS: u32 = 26;

/// One sheet: a bounded grid of sparse cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    rows: u32,
    cols: u32,
    cells: BTreeMap<CellRef, CellValue>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_size(name, DEFAULT_ROWS, DEFAULT_COLS)
    }

    pub fn with_size(name: impl Into<String>, rows: u32, cols: u32) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
            cells: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Value at `cell`, `Empty` when unset.
    pub fn get(&self, cell: &CellRef) -> CellValue {
        self.cells.get(cell).cloned().unwrap_or_default()
    }

    /// Number of non-empty cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn out_of_bounds(&self, target: String) -> ApplyError {
        ApplyError::OutOfBounds {
            sheet: self.name.clone(),
            target,
            rows: self.rows,
            cols: self.cols,
        }
    }

    fn check_range(&self, range: &Range) -> Result<(), ApplyError> {
        if range.end.row >= self.rows || range.end.col >= self.cols {
            return Err(self.out_of_bounds(range.to_string()));
        }
        Ok(())
    }

    fn put(&mut self, cell: CellRef, value: CellValue) {
        if value.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, value);
        }
    }

    fn set_cell(&mut self, cell: CellRef, value: CellValue) -> Result<(), ApplyError> {
        self.check_range(&Range::single(cell))?;
        self.put(cell, value);
        Ok(())
    }

    fn set_range(&mut self, range: &Range, values: &[Vec<CellValue>]) -> Result<(), ApplyError> {
        self.check_range(range)?;
        let shape_ok = values.len() as u32 == range.rows()
            && values.iter().all(|row| row.len() as u32 == range.cols());
        if !shape_ok {
            return Err(ApplyError::ShapeMismatch {
                range: range.to_string(),
                expected_rows: range.rows(),
                expected_cols: range.cols(),
                rows: values.len() as u32,
                cols: values.first().map(|r| r.len() as u32).unwrap_or(0),
            });
        }
        for (dr, row) in values.iter().enumerate() {
            for (dc, value) in row.iter().enumerate() {
                let cell = CellRef::new(range.start.row + dr as u32, range.start.col + dc as u32);
                self.put(cell, value.clone());
            }
        }
        Ok(())
    }

    fn clear_range(&mut self, range: &Range) -> Result<(), ApplyError> {
        self.check_range(range)?;
        self.cells.retain(|cell, _| !range.contains(cell));
        Ok(())
    }

    fn insert_rows(&mut self, at: u32, count: u32) -> Result<(), ApplyError> {
        if count == 0 {
            return Err(ApplyError::Invalid("insertRows with count 0".into()));
        }
        if at > self.rows {
            return Err(self.out_of_bounds(format!("row {}", at.saturating_add(1))));
        }
        let rows = self
            .rows
            .checked_add(count)
            .filter(|r| *r <= MAX_ROWS)
            .ok_or_else(|| ApplyError::Invalid(format!("sheet '{}' would exceed {MAX_ROWS} rows", self.name)))?;
        self.cells = std::mem::take(&mut self.cells)
            .into_iter()
            .map(|(cell, v)| {
                if cell.row >= at {
                    (CellRef::new(cell.row + count, cell.col), v)
                } else {
                    (cell, v)
                }
            })
            .collect();
        self.rows = rows;
        Ok(())
    }

    fn delete_rows(&mut self, at: u32, count: u32) -> Result<(), ApplyError> {
        if count == 0 {
            return Err(ApplyError::Invalid("deleteRows with count 0".into()));
        }
        if at.checked_add(count).is_none_or(|end| end > self.rows) {
            return Err(self.out_of_bounds(format!("rows {}..{}", at.saturating_add(1), at.saturating_add(count))));
        }
        self.cells = std::mem::take(&mut self.cells)
            .into_iter()
            .filter(|(cell, _)| cell.row < at || cell.row >= at + count)
            .map(|(cell, v)| {
                if cell.row >= at + count {
                    (CellRef::new(cell.row - count, cell.col), v)
                } else {
                    (cell, v)
                }
            })
            .collect();
        self.rows -= count;
        Ok(())
    }

    fn insert_columns(&mut self, at: u32, count: u32) -> Result<(), ApplyError> {
        if count == 0 {
            return Err(ApplyError::Invalid("insertColumns with count 0".into()));
        }
        if at > self.cols {
            return Err(self.out_of_bounds(format!("column {}", at.saturating_add(1))));
        }
        let cols = self
            .cols
            .checked_add(count)
            .filter(|c| *c <= MAX_COLS)
            .ok_or_else(|| ApplyError::Invalid(format!("sheet '{}' would exceed {MAX_COLS} columns", self.name)))?;
        self.cells = std::mem::take(&mut self.cells)
            .into_iter()
            .map(|(cell, v)| {
                if cell.col >= at {
                    (CellRef::new(cell.row, cell.col + count), v)
                } else {
                    (cell, v)
                }
            })
            .collect();
        self.cols = cols;
        Ok(())
    }

    fn delete_columns(&mut self, at: u32, count: u32) -> Result<(), ApplyError> {
        if count == 0 {
            return Err(ApplyError::Invalid("deleteColumns with count 0".into()));
        }
        if at.checked_add(count).is_none_or(|end| end > self.cols) {
            return Err(self.out_of_bounds(format!("columns {}..{}", at.saturating_add(1), at.saturating_add(count))));
        }
        self.cells = std::mem::take(&mut self.cells)
            .into_iter()
            .filter(|(cell, _)| cell.col < at || cell.col >= at + count)
            .map(|(cell, v)| {
                if cell.col >= at + count {
                    (CellRef::new(cell.row, cell.col - count), v)
                } else {
                    (cell, v)
                }
            })
            .collect();
        self.cols -= count;
        Ok(())
    }
}

// ============================================================================
// Snapshot wire form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkbookSnapshot {
    sheets: Vec<SheetSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetSnapshot {
    name: String,
    rows: u32,
    cols: u32,
    /// A1 address → value.
    #[serde(default)]
    cells: BTreeMap<String, CellValue>,
}

// ============================================================================
// Workbook
// ============================================================================

/// Ordered collection of sheets with dirty tracking.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    /// Cells edited locally since the last submitted snapshot.
    dirty_cells: BTreeSet<(String, CellRef)>,
    /// A local structural edit (rows, columns, sheets) since the last snapshot.
    structure_dirty: bool,
    /// Bumped on every successful mutation, from either path.
    version: u64,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A workbook with one empty sheet per name.
    pub fn with_sheets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sheets: names.into_iter().map(Sheet::new).collect(),
            ..Self::default()
        }
    }

    /// Rebuild a workbook from a value produced by [`SheetDocument::snapshot`].
    /// The result is clean.
    pub fn from_snapshot(value: &Value) -> Result<Self, serde_json::Error> {
        let snapshot: WorkbookSnapshot = serde_json::from_value(value.clone())?;
        let mut sheets = Vec::with_capacity(snapshot.sheets.len());
        for s in snapshot.sheets {
            let mut sheet = Sheet::with_size(s.name, s.rows, s.cols);
            for (addr, value) in s.cells {
                let cell: CellRef = addr
                    .parse()
                    .map_err(<serde_json::Error as serde::de::Error>::custom)?;
                sheet.put(cell, value);
            }
            sheets.push(sheet);
        }
        Ok(Self {
            sheets,
            ..Self::default()
        })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Convenience lookup; `Empty` for missing sheets and unset cells.
    pub fn cell(&self, sheet: &str, cell: &str) -> CellValue {
        match (self.sheet(sheet), cell.parse::<CellRef>()) {
            (Some(s), Ok(c)) => s.get(&c),
            _ => CellValue::Empty,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Cells edited locally since the last clear, in address order.
    pub fn dirty_cells(&self) -> impl Iterator<Item = (&str, CellRef)> {
        self.dirty_cells.iter().map(|(s, c)| (s.as_str(), *c))
    }

    /// Apply a user edit and mark what it touched dirty.
    pub fn edit(&mut self, command: &EditCommand) -> Result<(), ApplyError> {
        self.mutate(command)?;
        match command {
            EditCommand::SetCell { sheet, cell, .. } => {
                self.dirty_cells.insert((sheet.clone(), *cell));
            }
            EditCommand::SetRange { sheet, range, .. } | EditCommand::ClearRange { sheet, range } => {
                for row in range.start.row..=range.end.row {
                    for col in range.start.col..=range.end.col {
                        self.dirty_cells.insert((sheet.clone(), CellRef::new(row, col)));
                    }
                }
            }
            _ => self.structure_dirty = true,
        }
        Ok(())
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Sheet, ApplyError> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ApplyError::MissingSheet(name.to_string()))
    }

    fn mutate(&mut self, command: &EditCommand) -> Result<(), ApplyError> {
        match command {
            EditCommand::SetCell { sheet, cell, value } => {
                self.sheet_mut(sheet)?.set_cell(*cell, value.clone())?
            }
            EditCommand::SetRange { sheet, range, values } => {
                self.sheet_mut(sheet)?.set_range(range, values)?
            }
            EditCommand::ClearRange { sheet, range } => self.sheet_mut(sheet)?.clear_range(range)?,
            EditCommand::InsertRows { sheet, at, count } => {
                self.sheet_mut(sheet)?.insert_rows(*at, *count)?
            }
            EditCommand::DeleteRows { sheet, at, count } => {
                self.sheet_mut(sheet)?.delete_rows(*at, *count)?
            }
            EditCommand::InsertColumns { sheet, at, count } => {
                self.sheet_mut(sheet)?.insert_columns(*at, *count)?
            }
            EditCommand::DeleteColumns { sheet, at, count } => {
                self.sheet_mut(sheet)?.delete_columns(*at, *count)?
            }
            EditCommand::AddSheet { name } => {
                if name.trim().is_empty() {
                    return Err(ApplyError::Invalid("sheet name must not be blank".into()));
                }
                if self.sheet(name).is_some() {
                    return Err(ApplyError::SheetExists(name.clone()));
                }
                self.sheets.push(Sheet::new(name.clone()));
            }
            EditCommand::RemoveSheet { name } => {
                let idx = self
                    .sheets
                    .iter()
                    .position(|s| &s.name == name)
                    .ok_or_else(|| ApplyError::MissingSheet(name.clone()))?;
                self.sheets.remove(idx);
                self.dirty_cells.retain(|(s, _)| s != name);
            }
            EditCommand::RenameSheet { from, to } => {
                if to.trim().is_empty() {
                    return Err(ApplyError::Invalid("sheet name must not be blank".into()));
                }
                if from != to && self.sheet(to).is_some() {
                    return Err(ApplyError::SheetExists(to.clone()));
                }
                self.sheet_mut(from)?.name = to.clone();
            }
        }
        self.version += 1;
        Ok(())
    }
}

impl SheetDocument for Workbook {
    fn apply_command(&mut self, command: &EditCommand) -> Result<(), ApplyError> {
        self.mutate(command)
    }

    fn is_dirty(&self) -> bool {
        self.structure_dirty || !self.dirty_cells.is_empty()
    }

    fn clear_dirty(&mut self) {
        self.dirty_cells.clear();
        self.structure_dirty = false;
    }

    fn snapshot(&self) -> Value {
        let snapshot = WorkbookSnapshot {
            sheets: self
                .sheets
                .iter()
                .map(|s| SheetSnapshot {
                    name: s.name.clone(),
                    rows: s.rows,
                    cols: s.cols,
                    cells: s.cells.iter().map(|(c, v)| (c.to_string(), v.clone())).collect(),
                })
                .collect(),
        };
        serde_json::to_value(snapshot).unwrap_or(Value::Null)
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }
}
