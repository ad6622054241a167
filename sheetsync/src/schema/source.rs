//! Row-oriented readers that feed the inference engine.

use crate::error::Result;
use std::fmt;
use std::path::Path;

/// A typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    Bool(bool),
}

impl CellValue {
    /// Type a raw text cell: integer, then finite float, then text.
    pub fn infer(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return CellValue::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => CellValue::Number(f),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    /// A cell holding `raw` exactly as written; empty text is null.
    pub fn text(raw: &str) -> Self {
        if raw.is_empty() {
            CellValue::Null
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    /// Display form of the cell; `None` for null cells.
    pub fn raw(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// True for null cells and empty text.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}

impl From<&str> for CellValue {
    fn from(raw: &str) -> Self {
        CellValue::infer(raw)
    }
}

/// A workbook of one or more sheets, read row by row.
pub trait SheetSource {
    /// Next row of the current sheet, or `None` at the end of the sheet.
    fn read_row(&mut self) -> Option<Vec<CellValue>>;

    /// Move to the start of the next sheet. Returns false when there is none.
    fn next_sheet(&mut self) -> bool;
}

/// Sheets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySheets {
    sheets: Vec<Vec<Vec<CellValue>>>,
    sheet: usize,
    row: usize,
}

impl MemorySheets {
    pub fn new(sheets: Vec<Vec<Vec<CellValue>>>) -> Self {
        MemorySheets {
            sheets,
            sheet: 0,
            row: 0,
        }
    }

    /// Build sheets from raw strings. Cells keep their text as written.
    pub fn from_strings(sheets: &[&[&[&str]]]) -> Self {
        let sheets = sheets
            .iter()
            .map(|sheet| {
                sheet
                    .iter()
                    .map(|row| row.iter().map(|c| CellValue::text(c)).collect())
                    .collect()
            })
            .collect();
        MemorySheets::new(sheets)
    }
}

impl SheetSource for MemorySheets {
    fn read_row(&mut self) -> Option<Vec<CellValue>> {
        let row = self.sheets.get(self.sheet)?.get(self.row)?.clone();
        self.row += 1;
        Some(row)
    }

    fn next_sheet(&mut self) -> bool {
        if self.sheet + 1 < self.sheets.len() {
            self.sheet += 1;
            self.row = 0;
            true
        } else {
            false
        }
    }
}

/// A CSV file read as a workbook.
///
/// Records made only of empty cells separate sheets, so one file can carry
/// several sheets when processed in multi-sheet mode. Cells are kept as the
/// text found in the file; typing happens during inference.
#[derive(Debug, Clone)]
pub struct CsvSheetSource {
    inner: MemorySheets,
}

impl CsvSheetSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        Self::from_reader(reader)
    }

    pub fn from_text(content: &str) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let mut sheets: Vec<Vec<Vec<CellValue>>> = vec![Vec::new()];
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                if sheets.last().map_or(false, |s| !s.is_empty()) {
                    sheets.push(Vec::new());
                }
                continue;
            }
            let row = record.iter().map(CellValue::text).collect();
            if let Some(sheet) = sheets.last_mut() {
                sheet.push(row);
            }
        }
        if sheets.len() > 1 && sheets.last().map_or(false, |s| s.is_empty()) {
            sheets.pop();
        }
        Ok(CsvSheetSource {
            inner: MemorySheets::new(sheets),
        })
    }
}

impl SheetSource for CsvSheetSource {
    fn read_row(&mut self) -> Option<Vec<CellValue>> {
        self.inner.read_row()
    }

    fn next_sheet(&mut self) -> bool {
        self.inner.next_sheet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_cell_types() {
        assert_eq!(CellValue::infer("12"), CellValue::Integer(12));
        assert_eq!(CellValue::infer("1.5"), CellValue::Number(1.5));
        assert_eq!(CellValue::infer("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(CellValue::infer("Alice"), CellValue::Text("Alice".into()));
        assert_eq!(CellValue::infer(""), CellValue::Null);
    }

    #[test]
    fn test_whole_number_renders_without_fraction() {
        assert_eq!(CellValue::Number(1.0).raw().as_deref(), Some("1"));
        assert_eq!(CellValue::Number(2.25).raw().as_deref(), Some("2.25"));
        assert_eq!(CellValue::Null.raw(), None);
    }

    #[test]
    fn test_memory_sheets_walks_rows_and_sheets() {
        let mut source = MemorySheets::from_strings(&[&[&["A:int"], &["1"]], &[&["B:int"]]]);
        assert_eq!(source.read_row().unwrap()[0], CellValue::Text("A:int".into()));
        assert_eq!(source.read_row().unwrap()[0], CellValue::Text("1".into()));
        assert!(source.read_row().is_none());
        assert!(source.next_sheet());
        assert_eq!(source.read_row().unwrap()[0], CellValue::Text("B:int".into()));
        assert!(!source.next_sheet());
    }

    #[test]
    fn test_csv_blank_records_split_sheets() {
        let mut source =
            CsvSheetSource::from_text("Id:int,Name:text\n1,Alice\n,\nId:int\n7\n").unwrap();
        assert_eq!(source.read_row().unwrap().len(), 2);
        assert_eq!(source.read_row().unwrap()[1], CellValue::Text("Alice".into()));
        assert!(source.read_row().is_none());
        assert!(source.next_sheet());
        assert_eq!(source.read_row().unwrap()[0], CellValue::Text("Id:int".into()));
        assert_eq!(source.read_row().unwrap()[0], CellValue::Text("7".into()));
        assert!(!source.next_sheet());
    }

    #[test]
    fn test_csv_cells_keep_their_text() {
        let mut source =
            CsvSheetSource::from_text("Code:text,Version:text,Big:text,Empty:text
007,1.10,12345678901234567890,
")
                .unwrap();
        source.read_row().unwrap();
        let row: Vec<Option<String>> = source.read_row().unwrap().iter().map(CellValue::raw).collect();
        assert_eq!(
            row,
            vec![
                Some("007".to_string()),
                Some("1.10".to_string()),
                Some("12345678901234567890".to_string()),
                None,
            ]
        );
    }
}
