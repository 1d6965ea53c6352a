//! `ResultApplier` that writes into an in-memory `Workbook`.
//!
//! All writes are staged on a copy of the active sheet while the workbook
//! lock is held, then swapped in with a single assignment. A failed write
//! leaves the visible sheet untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::sheet::{CellFormat, CellRef, CellValue, Sheet, Workbook};
use crate::agent_core::applier::{ApplyError, ResultApplier};
use crate::agent_core::types::{
    AgentMessage, AnalysisReport, DisplayInstructions, Intent, Interpretation, MessageContent,
    RowSet,
};

// ─── Layout ─────────────────────────────────────────────────────────────────

/// Where each kind of output lands on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyLayout {
    /// Top-left cell of the query table (header row first).
    pub data_anchor: CellRef,
    /// Top-left cell of the analysis block. Moved down if the data table
    /// reaches it, so the analysis never overwrites rows.
    pub analysis_anchor: CellRef,
    /// Cell that receives suggestions for non-query intents.
    pub notes_anchor: CellRef,
}

impl ApplyLayout {
    /// Build a layout from A1 references.
    pub fn parse(data: &str, analysis: &str, notes: &str) -> Result<Self, ApplyError> {
        Ok(Self {
            data_anchor: data.parse()?,
            analysis_anchor: analysis.parse()?,
            notes_anchor: notes.parse()?,
        })
    }
}

impl Default for ApplyLayout {
    fn default() -> Self {
        Self {
            data_anchor: CellRef::new(0, 0),
            analysis_anchor: CellRef::new(9, 0),
            notes_anchor: CellRef::new(0, 7),
        }
    }
}

// ─── Applier ────────────────────────────────────────────────────────────────

/// Applies messages to the active sheet of a shared workbook.
#[derive(Clone)]
pub struct WorkbookApplier {
    workbook: Arc<Mutex<Workbook>>,
    layout: ApplyLayout,
}

impl WorkbookApplier {
    pub fn new(workbook: Arc<Mutex<Workbook>>, layout: ApplyLayout) -> Self {
        Self { workbook, layout }
    }

    pub fn workbook(&self) -> Arc<Mutex<Workbook>> {
        Arc::clone(&self.workbook)
    }

    /// Stage every write for `messages` on `sheet`.
    fn stage(&self, sheet: &mut Sheet, messages: &[AgentMessage]) -> Result<usize, ApplyError> {
        let mut writes = 0;
        let mut data_end: Option<u32> = None;

        for message in messages {
            match message.content() {
                MessageContent::Interpretation(interpretation) => {
                    writes += self.stage_interpretation(sheet, message.intent(), interpretation)?;
                }
                MessageContent::Rows(rows) => {
                    let (count, last_row) = self.stage_rows(sheet, rows)?;
                    writes += count;
                    data_end = Some(last_row);
                }
                MessageContent::Analysis(report) => {
                    let mut anchor = self.layout.analysis_anchor;
                    if let Some(end) = data_end {
                        if anchor.row <= end + 1 {
                            anchor.row = end + 2;
                        }
                    }
                    writes += stage_analysis(sheet, anchor, report)?;
                }
                MessageContent::Failure(cause) => {
                    return Err(ApplyError::UnexpectedMessage {
                        reason: format!("error message from {}: {cause}", message.source().as_str()),
                    });
                }
            }
        }

        Ok(writes)
    }

    fn stage_interpretation(
        &self,
        sheet: &mut Sheet,
        intent: Intent,
        interpretation: &Interpretation,
    ) -> Result<usize, ApplyError> {
        match (intent, &interpretation.display) {
            // Query data follows in its own message.
            (Intent::Query, _) => Ok(0),
            (Intent::Format, Some(display)) if !sheet.is_empty() => {
                apply_display(sheet, display)
            }
            _ => {
                if interpretation.suggestion.is_empty() {
                    return Ok(0);
                }
                sheet.set_value(
                    self.layout.notes_anchor,
                    CellValue::Text(interpretation.suggestion.clone()),
                )?;
                Ok(1)
            }
        }
    }

    /// Write the header and rows; returns the write count and last row used.
    fn stage_rows(&self, sheet: &mut Sheet, rows: &RowSet) -> Result<(usize, u32), ApplyError> {
        let anchor = self.layout.data_anchor;
        let header = CellFormat {
            number_format: None,
            bold: true,
        };
        let mut writes = 0;

        for (c, name) in rows.columns.iter().enumerate() {
            let cell = anchor.offset(0, c as u32);
            sheet.set_value(cell, CellValue::Text(name.clone()))?;
            sheet.set_format(cell, header.clone())?;
            writes += 1;
        }
        for (r, record) in rows.rows.iter().enumerate() {
            for (c, value) in record.iter().enumerate() {
                let cell = anchor.offset(r as u32 + 1, c as u32);
                sheet.set_value(cell, CellValue::from_json(value))?;
                writes += 1;
            }
        }

        Ok((writes, anchor.row + rows.len() as u32))
    }
}

#[async_trait]
impl ResultApplier for WorkbookApplier {
    async fn apply_results(&self, messages: &[AgentMessage]) -> Result<(), ApplyError> {
        if let Some(failed) = messages.iter().find(|m| m.intent() == Intent::Error) {
            return Err(ApplyError::UnexpectedMessage {
                reason: format!(
                    "refusing to apply error message from {}",
                    failed.source().as_str()
                ),
            });
        }

        let mut workbook = self.workbook.lock().await;
        let mut staged = workbook.active().clone();
        let writes = self.stage(&mut staged, messages)?;
        workbook.replace_active(staged);

        tracing::info!(
            messages = messages.len(),
            writes = writes,
            "applier: committed results to workbook"
        );
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn stage_analysis(
    sheet: &mut Sheet,
    anchor: CellRef,
    report: &AnalysisReport,
) -> Result<usize, ApplyError> {
    let bold = CellFormat {
        number_format: None,
        bold: true,
    };
    let mut writes = 0;
    let mut row = 0;

    sheet.set_value(anchor, CellValue::Text("Summary".into()))?;
    sheet.set_format(anchor, bold.clone())?;
    sheet.set_value(anchor.offset(0, 1), CellValue::Text(report.summary.clone()))?;
    writes += 2;
    row += 1;

    if !report.insights.is_empty() {
        let headers = ["Insight", "Subject", "Value", "Severity", "Description"];
        for (c, h) in headers.iter().enumerate() {
            let cell = anchor.offset(row, c as u32);
            sheet.set_value(cell, CellValue::Text((*h).to_string()))?;
            sheet.set_format(cell, bold.clone())?;
            writes += 1;
        }
        row += 1;

        for insight in &report.insights {
            let values = [
                CellValue::Text(insight.kind.as_str().to_string()),
                CellValue::Text(insight.subject.clone()),
                CellValue::Number(insight.value),
                CellValue::Text(insight.severity.as_str().to_string()),
                CellValue::Text(insight.description.clone()),
            ];
            for (c, value) in values.into_iter().enumerate() {
                sheet.set_value(anchor.offset(row, c as u32), value)?;
                writes += 1;
            }
            row += 1;
        }
    }

    if !report.recommendations.is_empty() {
        let label = anchor.offset(row, 0);
        sheet.set_value(label, CellValue::Text("Recommendations".into()))?;
        sheet.set_format(label, bold)?;
        writes += 1;
        row += 1;
        for recommendation in &report.recommendations {
            sheet.set_value(anchor.offset(row, 0), CellValue::Text(recommendation.clone()))?;
            writes += 1;
            row += 1;
        }
    }

    Ok(writes)
}

/// Apply display instructions to every numeric cell on the sheet.
fn apply_display(sheet: &mut Sheet, display: &DisplayInstructions) -> Result<usize, ApplyError> {
    let targets: Vec<(CellRef, CellFormat)> = sheet
        .populated()
        .into_iter()
        .filter(|(_, cell)| matches!(cell.value, CellValue::Number(_)))
        .map(|(r, cell)| {
            let mut format = cell.format.clone();
            if display.number_format.is_some() {
                format.number_format = display.number_format.clone();
            }
            format.bold = format.bold || display.emphasis;
            (r, format)
        })
        .collect();

    let count = targets.len();
    for (cell, format) in targets {
        sheet.set_format(cell, format)?;
    }
    Ok(count)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
