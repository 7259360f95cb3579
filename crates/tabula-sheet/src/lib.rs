//! Spreadsheet document model and AI edit-command application for tabula.
//!
//! - [`address`]: A1 cell/range addressing
//! - [`command`]: the `sheet-edit/v1` command vocabulary
//! - [`document`]: the [`SheetDocument`] seam the host application implements
//! - [`workbook`]: in-memory [`Workbook`] with dirty tracking
//! - [`router`]: [`CommandRouter`], deterministic fail-soft application

pub mod address;
pub mod command;
pub mod document;
pub mod router;
pub mod workbook;

pub use address::{AddressError, CellRef, Range};
pub use command::{ApplyError, CellValue, CommandBatch, CommandSchema, EditCommand};
pub use document::SheetDocument;
pub use router::{
    ApplyOutcome, ApplyReport, CommandRouter, PayloadEntry, RouterError, SkippedCommand,
};
pub use workbook::{Sheet, Workbook};
