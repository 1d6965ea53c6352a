//! Host document: an in-memory workbook and the applier that writes
//! Request results into it.

pub mod applier;
pub mod sheet;

pub use applier::{ApplyLayout, WorkbookApplier};
pub use sheet::{Cell, CellFormat, CellRef, CellValue, Sheet, Workbook};
