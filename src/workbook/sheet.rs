//! In-memory host document: A1-addressed cells on bounded sheets.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agent_core::errors::ApplyError;

// ─── Cell Addressing ────────────────────────────────────────────────────────

/// A 0-based cell coordinate, written and parsed in A1 notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// The cell `rows` down and `cols` right of this one.
    pub fn offset(&self, rows: u32, cols: u32) -> Self {
        Self {
            row: self.row.saturating_add(rows),
            col: self.col.saturating_add(cols),
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), u64::from(self.row) + 1)
    }
}

impl FromStr for CellRef {
    type Err = ApplyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ApplyError::InvalidAnchor {
            anchor: s.to_string(),
        };
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = trimmed.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }

        let mut col: u64 = 0;
        for c in letters.chars() {
            let digit = u64::from(c.to_ascii_uppercase() as u8 - b'A') + 1;
            col = col * 26 + digit;
            if col > u64::from(u32::MAX) {
                return Err(invalid());
            }
        }
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }

        Ok(Self {
            row: row - 1,
            col: (col - 1) as u32,
        })
    }
}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

// ─── Cells ──────────────────────────────────────────────────────────────────

/// Value stored in a cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl CellValue {
    /// Map a JSON scalar from a RowSet into a cell value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

/// Presentation applied to a cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CellFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
    #[serde(default)]
    pub bold: bool,
}

impl CellFormat {
    /// Render a value as it would display with this format.
    pub fn render(&self, value: &CellValue) -> String {
        match value {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Number(n) => match self.number_format.as_deref() {
                Some(fmt) if fmt.ends_with('%') => format!("{:.2}%", n * 100.0),
                Some(fmt) if fmt.starts_with('$') => {
                    let sign = if *n < 0.0 { "-" } else { "" };
                    format!("{sign}${}", group_thousands(n.abs()))
                }
                Some(fmt) if fmt.contains(',') => group_thousands(*n),
                Some(fmt) if fmt.contains('.') => format!("{n:.2}"),
                _ => format_plain(*n),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    #[serde(default)]
    pub format: CellFormat,
}

// ─── Sheets ─────────────────────────────────────────────────────────────────

/// A bounded grid of cells. Writes outside the bounds are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    cells: HashMap<CellRef, Cell>,
    max_rows: u32,
    max_cols: u32,
}

impl Sheet {
    pub fn new(name: &str, max_rows: u32, max_cols: u32) -> Self {
        Self {
            name: name.to_string(),
            cells: HashMap::new(),
            max_rows,
            max_cols,
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    pub fn max_cols(&self) -> u32 {
        self.max_cols
    }

    pub fn check_bounds(&self, cell: CellRef) -> Result<(), ApplyError> {
        if cell.row >= self.max_rows || cell.col >= self.max_cols {
            return Err(ApplyError::OutOfBounds {
                cell: cell.to_string(),
                max_rows: self.max_rows,
                max_cols: self.max_cols,
            });
        }
        Ok(())
    }

    pub fn set_value(&mut self, cell: CellRef, value: CellValue) -> Result<(), ApplyError> {
        self.check_bounds(cell)?;
        self.cells.entry(cell).or_default().value = value;
        Ok(())
    }

    pub fn set_format(&mut self, cell: CellRef, format: CellFormat) -> Result<(), ApplyError> {
        self.check_bounds(cell)?;
        self.cells.entry(cell).or_default().format = format;
        Ok(())
    }

    pub fn get(&self, cell: CellRef) -> Option<&Cell> {
        self.cells.get(&cell)
    }

    pub fn value(&self, cell: CellRef) -> CellValue {
        self.cells
            .get(&cell)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    /// Every cell holding a value, in row-major order.
    pub fn populated(&self) -> Vec<(CellRef, &Cell)> {
        let mut out: Vec<(CellRef, &Cell)> = self
            .cells
            .iter()
            .filter(|(_, c)| !c.value.is_empty())
            .map(|(r, c)| (*r, c))
            .collect();
        out.sort_by_key(|(r, _)| *r);
        out
    }

    /// Bottom-right corner of the populated region, if any.
    pub fn used_range(&self) -> Option<CellRef> {
        let populated = self.populated();
        if populated.is_empty() {
            return None;
        }
        let max_row = populated.iter().map(|(r, _)| r.row).max().unwrap_or(0);
        let max_col = populated.iter().map(|(r, _)| r.col).max().unwrap_or(0);
        Some(CellRef::new(max_row, max_col))
    }

    pub fn is_empty(&self) -> bool {
        self.used_range().is_none()
    }

    /// The populated region rendered as display strings, row by row.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let Some(corner) = self.used_range() else {
            return Vec::new();
        };
        (0..=corner.row)
            .map(|row| {
                (0..=corner.col)
                    .map(|col| {
                        self.get(CellRef::new(row, col))
                            .map(|c| c.format.render(&c.value))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    /// Plain-text grid with column letters and row numbers.
    pub fn render_grid(&self) -> String {
        let rows = self.to_rows();
        if rows.is_empty() {
            return format!("{} (empty)\n", self.name);
        }
        let cols = rows[0].len();
        let widths: Vec<usize> = (0..cols)
            .map(|c| {
                rows.iter()
                    .map(|r| r[c].chars().count())
                    .max()
                    .unwrap_or(0)
                    .max(col_to_letters(c as u32).len())
            })
            .collect();
        let gutter = rows.len().to_string().len();

        let mut out = format!("{:gutter$} |", "");
        for (c, w) in widths.iter().enumerate() {
            out.push_str(&format!(" {:<w$} |", col_to_letters(c as u32)));
        }
        out.push('\n');
        for (i, row) in rows.iter().enumerate() {
            out.push_str(&format!("{:>gutter$} |", i + 1));
            for (cell, w) in row.iter().zip(&widths) {
                out.push_str(&format!(" {cell:<w$} |"));
            }
            out.push('\n');
        }
        out
    }
}

// ─── Workbook ───────────────────────────────────────────────────────────────

/// A set of sheets with one active sheet that results are applied to.
#[derive(Debug, Clone, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    active: usize,
}

impl Workbook {
    /// A workbook with a single empty `Sheet1`.
    pub fn new(max_rows: u32, max_cols: u32) -> Self {
        Self {
            sheets: vec![Sheet::new("Sheet1", max_rows, max_cols)],
            active: 0,
        }
    }

    pub fn active(&self) -> &Sheet {
        &self.sheets[self.active]
    }

    /// Replace the active sheet in one step.
    pub fn replace_active(&mut self, sheet: Sheet) -> Sheet {
        std::mem::replace(&mut self.sheets[self.active], sheet)
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn format_plain(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n:.2}")
    }
}

fn group_thousands(n: f64) -> String {
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if n < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
    }

    #[test]
    fn test_parse_a1() {
        assert_eq!("A1".parse::<CellRef>().unwrap(), CellRef::new(0, 0));
        assert_eq!("a10".parse::<CellRef>().unwrap(), CellRef::new(9, 0));
        assert_eq!("AA3".parse::<CellRef>().unwrap(), CellRef::new(2, 26));
        assert_eq!(CellRef::new(9, 7).to_string(), "H10");
    }

    #[test]
    fn test_parse_a1_rejects_garbage() {
        for bad in ["", "1A", "A0", "A", "12", "A1B", "Ä1"] {
            assert!(
                matches!(bad.parse::<CellRef>(), Err(ApplyError::InvalidAnchor { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_bounds() {
        let mut sheet = Sheet::new("S", 2, 2);
        assert!(sheet.set_value(CellRef::new(1, 1), CellValue::Number(1.0)).is_ok());
        let err = sheet
            .set_value(CellRef::new(2, 0), CellValue::Number(1.0))
            .unwrap_err();
        assert_eq!(
            err,
            ApplyError::OutOfBounds {
                cell: "A3".into(),
                max_rows: 2,
                max_cols: 2
            }
        );
    }

    #[test]
    fn test_used_range_and_rows() {
        let mut sheet = Sheet::new("S", 10, 10);
        assert!(sheet.is_empty());
        sheet.set_value(CellRef::new(0, 0), CellValue::Text("x".into())).unwrap();
        sheet.set_value(CellRef::new(2, 1), CellValue::Number(3.0)).unwrap();
        assert_eq!(sheet.used_range(), Some(CellRef::new(2, 1)));
        let rows = sheet.to_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["x", ""]);
        assert_eq!(rows[2], vec!["", "3"]);
    }

    #[test]
    fn test_format_render() {
        let currency = CellFormat {
            number_format: Some("$#,##0.00".into()),
            bold: false,
        };
        assert_eq!(currency.render(&CellValue::Number(1234567.891)), "$1,234,567.89");
        assert_eq!(currency.render(&CellValue::Number(-12.5)), "-$12.50");

        let percent = CellFormat {
            number_format: Some("0.00%".into()),
            bold: false,
        };
        assert_eq!(percent.render(&CellValue::Number(0.125)), "12.50%");
        assert_eq!(CellFormat::default().render(&CellValue::Number(42.0)), "42");
    }

    #[test]
    fn test_from_json() {
        assert_eq!(CellValue::from_json(&serde_json::json!(null)), CellValue::Empty);
        assert_eq!(CellValue::from_json(&serde_json::json!(2)), CellValue::Number(2.0));
        assert_eq!(
            CellValue::from_json(&serde_json::json!("ACME")),
            CellValue::Text("ACME".into())
        );
    }

    #[test]
    fn test_replace_active() {
        let mut wb = Workbook::new(5, 5);
        let mut staged = wb.active().clone();
        staged.set_value(CellRef::new(0, 0), CellValue::Bool(true)).unwrap();
        wb.replace_active(staged);
        assert_eq!(wb.active().value(CellRef::new(0, 0)), CellValue::Bool(true));
        assert_eq!(wb.sheets().len(), 1);
    }
}
