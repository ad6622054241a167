mod inference;
mod parser;
mod source;
mod types;

pub use inference::{infer_sheet, infer_workbook, storage_type, WorkbookSchema};
pub use parser::{parse_header, HeaderCell};
pub use source::{CellValue, CsvSheetSource, MemorySheets, SheetSource};
pub use types::{ColumnSpec, DeclaredType, EnumAccumulator, FieldType, SheetSchema, SqlType};
