//! Turns `Name:Type` annotated sheets into column specs, DDL and row literals.
//!
//! Storage types come from the first data row: a value that parses as an
//! integer is stored as INTEGER, a finite float as REAL, anything else as
//! TEXT. Headers repeating a field name fold into one array column stored as
//! a JSON-encoded TEXT value.
//!
//! Row literals are emitted verbatim between single quotes. Embedded quotes
//! are not escaped, so a value containing `'` produces a literal the store
//! will reject.

use super::parser::{parse_header, HeaderCell};
use super::source::{CellValue, SheetSource};
use super::types::{ColumnSpec, DeclaredType, EnumAccumulator, FieldType, SheetSchema, SqlType};
use crate::error::{Result, SheetSyncError};

/// Schemas inferred from every sheet of one source file.
#[derive(Debug, Default)]
pub struct WorkbookSchema {
    pub sheets: Vec<SheetSchema>,
    /// Schema errors of sheets that were skipped.
    pub errors: Vec<SheetSyncError>,
    pub enums: EnumAccumulator,
}

/// Infer every sheet of `source`.
///
/// Single-sheet mode reads the first sheet into a table named `file_stem`.
/// Multi-sheet mode walks all sheets into tables `{file_stem}1`,
/// `{file_stem}2`, ... A schema error only skips the sheet it occurred in.
pub fn infer_workbook(
    source: &mut dyn SheetSource,
    file_stem: &str,
    multi_sheet: bool,
) -> Result<WorkbookSchema> {
    let mut workbook = WorkbookSchema::default();
    let mut sheet_number = 0;

    loop {
        let table_name = if multi_sheet {
            sheet_number += 1;
            format!("{file_stem}{sheet_number}")
        } else {
            file_stem.to_string()
        };

        match infer_sheet(source, &table_name, &mut workbook.enums) {
            Ok(sheet) => workbook.sheets.push(sheet),
            Err(e) if e.is_schema() => {
                log::warn!("Skipping sheet {table_name}: {e}");
                workbook.errors.push(e);
            }
            Err(e) => return Err(e),
        }

        if !multi_sheet || !source.next_sheet() {
            break;
        }
    }

    Ok(workbook)
}

/// Infer the current sheet of `source` as table `table_name`.
///
/// Enum-typed headers open an entry in `enums` and every non-empty value
/// seen under them is recorded.
pub fn infer_sheet(
    source: &mut dyn SheetSource,
    table_name: &str,
    enums: &mut EnumAccumulator,
) -> Result<SheetSchema> {
    let header_row = source.read_row().ok_or_else(|| SheetSyncError::Schema {
        table: table_name.to_string(),
        header: String::new(),
        reason: "missing header row".to_string(),
    })?;

    let mut headers = Vec::new();
    for (index, cell) in header_row.iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        headers.push(parse_header(table_name, &cell.to_string(), index)?);
    }

    let mut rows = Vec::new();
    while let Some(row) = source.read_row() {
        if row.first().map_or(true, CellValue::is_empty) {
            break;
        }
        rows.push(row);
    }

    let columns = build_columns(&headers, rows.first());
    let ddl = columns
        .iter()
        .map(ColumnSpec::ddl_fragment)
        .collect::<Vec<_>>()
        .join(", ");

    let enum_headers: Vec<&HeaderCell> = headers
        .iter()
        .filter(|h| h.field_type == FieldType::Enum)
        .collect();
    for header in &enum_headers {
        enums.open(&EnumAccumulator::key_for(&header.name));
    }

    let mut insert_literals = Vec::with_capacity(rows.len());
    for row in &rows {
        insert_literals.push(insert_literal(&columns, row)?);
        for header in &enum_headers {
            if let Some(value) = cell_at(row, header.index).raw() {
                enums.record(&EnumAccumulator::key_for(&header.name), &value);
            }
        }
    }

    log::debug!(
        "Inferred table {table_name}: {} columns, {} rows",
        columns.len(),
        insert_literals.len()
    );

    Ok(SheetSchema {
        table_name: table_name.to_string(),
        columns,
        ddl,
        insert_literals,
    })
}

/// Group headers by field name in first-seen order and pick storage types.
fn build_columns(headers: &[HeaderCell], first_row: Option<&Vec<CellValue>>) -> Vec<ColumnSpec> {
    let mut groups: Vec<(&str, Vec<&HeaderCell>)> = Vec::new();
    for header in headers {
        match groups.iter_mut().find(|(name, _)| *name == header.name) {
            Some((_, cells)) => cells.push(header),
            None => groups.push((&header.name, vec![header])),
        }
    }

    groups
        .into_iter()
        .map(|(name, cells)| {
            let element = cells[0].field_type;
            let is_array = cells.len() > 1;
            let declared_type = if is_array {
                DeclaredType::Array(element)
            } else {
                DeclaredType::Scalar(element)
            };
            let sql_type = if is_array {
                SqlType::Text
            } else {
                storage_type(first_row.map(|row| cell_at(row, cells[0].index)))
            };

            ColumnSpec {
                name: name.to_string(),
                declared_type,
                enum_name: (element == FieldType::Enum).then(|| name.to_string()),
                sql_type,
                indices: cells.iter().map(|c| c.index).collect(),
            }
        })
        .collect()
}

/// Storage type for a first-row value.
pub fn storage_type(value: Option<&CellValue>) -> SqlType {
    let Some(raw) = value.and_then(CellValue::raw) else {
        return SqlType::Text;
    };
    if raw.parse::<i64>().is_ok() {
        return SqlType::Integer;
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => SqlType::Real,
        _ => SqlType::Text,
    }
}

fn insert_literal(columns: &[ColumnSpec], row: &[CellValue]) -> Result<String> {
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if column.is_array() {
            let items: Vec<String> = column
                .indices
                .iter()
                .filter_map(|&i| cell_at(row, i).raw())
                .filter(|v| !v.is_empty())
                .collect();
            values.push(format!("'{}'", serde_json::to_string(&items)?));
        } else {
            let value = cell_at(row, column.indices[0]).raw().unwrap_or_default();
            values.push(format!("'{value}'"));
        }
    }
    Ok(format!("({})", values.join(", ")))
}

fn cell_at(row: &[CellValue], index: usize) -> &CellValue {
    const NULL: &CellValue = &CellValue::Null;
    row.get(index).unwrap_or(NULL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::source::MemorySheets;
    use pretty_assertions::assert_eq;

    fn infer(rows: &[&[&str]]) -> Result<(SheetSchema, EnumAccumulator)> {
        let mut source = MemorySheets::from_strings(&[rows]);
        let mut enums = EnumAccumulator::new();
        let sheet = infer_sheet(&mut source, "Items", &mut enums)?;
        Ok((sheet, enums))
    }

    #[test]
    fn test_basic_ddl_and_literals() {
        let (sheet, _) =
            infer(&[&["Id:int", "Name:text"], &["1", "Alice"], &["2", "Bob"]]).unwrap();
        assert_eq!(sheet.ddl, "Id INTEGER NOT NULL, Name TEXT NOT NULL");
        assert_eq!(sheet.insert_literals, vec!["('1', 'Alice')", "('2', 'Bob')"]);
        assert_eq!(sheet.table_name, "Items");
    }

    #[test]
    fn test_scalar_declared_types() {
        let (sheet, _) = infer(&[
            &["A:int", "B:float", "C:text", "D:enum"],
            &["1", "2.5", "x", "Red"],
        ])
        .unwrap();
        let declared: Vec<_> = sheet.columns.iter().map(|c| c.declared_type).collect();
        assert_eq!(
            declared,
            vec![
                DeclaredType::Scalar(FieldType::Int),
                DeclaredType::Scalar(FieldType::Float),
                DeclaredType::Scalar(FieldType::Text),
                DeclaredType::Scalar(FieldType::Enum),
            ]
        );
        assert_eq!(sheet.column("D").unwrap().enum_name.as_deref(), Some("D"));
        assert_eq!(sheet.column("A").unwrap().enum_name, None);
    }

    #[test]
    fn test_storage_type_follows_first_row_value() {
        let (sheet, _) = infer(&[
            &["Id:int", "Weight:float", "Label:int"],
            &["1", "2.5", "n/a"],
            &["2", "3", "4"],
        ])
        .unwrap();
        assert_eq!(
            sheet.ddl,
            "Id INTEGER NOT NULL, Weight REAL NOT NULL, Label TEXT NOT NULL"
        );
    }

    #[test]
    fn test_duplicate_headers_fold_into_one_array_column() {
        let (sheet, _) = infer(&[
            &["Id:int", "Tag:text", "Tag:text", "Tag:text"],
            &["1", "a", "", "c"],
            &["2", "", "", ""],
        ])
        .unwrap();
        assert_eq!(sheet.columns.len(), 2);
        let tag = sheet.column("Tag").unwrap();
        assert_eq!(tag.declared_type, DeclaredType::Array(FieldType::Text));
        assert_eq!(tag.indices, vec![1, 2, 3]);
        assert_eq!(sheet.ddl, "Id INTEGER NOT NULL, Tag TEXT NOT NULL");
        assert_eq!(
            sheet.insert_literals,
            vec![r#"('1', '["a","c"]')"#, "('2', '[]')"]
        );
    }

    #[test]
    fn test_array_of_ints_is_stored_as_text() {
        let (sheet, _) = infer(&[&["Slot:int", "Slot:int"], &["1", "2"]]).unwrap();
        assert_eq!(sheet.ddl, "Slot TEXT NOT NULL");
        assert_eq!(sheet.insert_literals, vec![r#"('["1","2"]')"#]);
    }

    #[test]
    fn test_enum_values_accumulate_in_first_seen_order() {
        let (_, enums) = infer(&[
            &["Id:int", "Color:enum"],
            &["1", "Red"],
            &["2", "Blue"],
            &["3", "Red"],
            &["4", "Green"],
        ])
        .unwrap();
        assert_eq!(enums.values("Color:enum").unwrap(), ["Red", "Blue", "Green"]);
    }

    #[test]
    fn test_enum_array_members_are_accumulated() {
        let (_, enums) = infer(&[
            &["Id:int", "Element:enum", "Element:enum"],
            &["1", "Fire", "Ice"],
            &["2", "Ice", ""],
        ])
        .unwrap();
        assert_eq!(enums.values("Element:enum").unwrap(), ["Fire", "Ice"]);
    }

    #[test]
    fn test_empty_first_cell_ends_sheet() {
        let (sheet, _) = infer(&[
            &["Id:int", "Name:text"],
            &["1", "Alice"],
            &["", "ignored"],
            &["3", "Carol"],
        ])
        .unwrap();
        assert_eq!(sheet.insert_literals.len(), 1);
    }

    #[test]
    fn test_empty_header_cells_are_skipped() {
        let (sheet, _) = infer(&[&["Id:int", "", "Name:text"], &["1", "junk", "Alice"]]).unwrap();
        assert_eq!(sheet.insert_literals, vec!["('1', 'Alice')"]);
        assert_eq!(sheet.column("Name").unwrap().indices, vec![2]);
    }

    #[test]
    fn test_sheet_without_rows_stores_text() {
        let (sheet, _) = infer(&[&["Id:int", "Name:text"]]).unwrap();
        assert_eq!(sheet.ddl, "Id TEXT NOT NULL, Name TEXT NOT NULL");
        assert!(sheet.insert_literals.is_empty());
    }

    #[test]
    fn test_malformed_header_is_schema_error() {
        let err = infer(&[&["Id:int", "Name"], &["1", "Alice"]]).unwrap_err();
        assert!(err.is_schema());
        assert!(err.to_string().contains("field:Name"));
    }

    #[test]
    fn test_embedded_quotes_are_not_escaped() {
        // Values are quoted verbatim; a quote inside a value is passed through
        // to the store unchanged.
        let (sheet, _) = infer(&[&["Id:int", "Name:text"], &["1", "O'Brien"]]).unwrap();
        assert_eq!(sheet.insert_literals, vec!["('1', 'O'Brien')"]);
    }

    #[test]
    fn test_multi_sheet_names_and_isolates_failures() {
        let mut source = MemorySheets::from_strings(&[
            &[&["Id:int"], &["1"]],
            &[&["Broken"], &["1"]],
            &[&["Id:int", "Color:enum"], &["5", "Red"]],
        ]);
        let workbook = infer_workbook(&mut source, "Items", true).unwrap();

        let names: Vec<_> = workbook.sheets.iter().map(|s| s.table_name.as_str()).collect();
        assert_eq!(names, vec!["Items1", "Items3"]);
        assert_eq!(workbook.errors.len(), 1);
        assert_eq!(workbook.enums.values("Color:enum").unwrap(), ["Red"]);
    }

    #[test]
    fn test_csv_text_reaches_literals_unchanged() {
        let mut source = crate::schema::source::CsvSheetSource::from_text(
            "Id:int,Code:text,Version:text,Big:text\n1,007,1.10,12345678901234567890\n",
        )
        .unwrap();
        let workbook = infer_workbook(&mut source, "Parts", false).unwrap();

        assert_eq!(
            workbook.sheets[0].insert_literals,
            vec!["('1', '007', '1.10', '12345678901234567890')"]
        );
    }

    #[test]
    fn test_single_sheet_mode_reads_first_sheet_only() {
        let mut source = MemorySheets::from_strings(&[&[&["Id:int"], &["1"]], &[&["Id:int"]]]);
        let workbook = infer_workbook(&mut source, "Items", false).unwrap();
        assert_eq!(workbook.sheets.len(), 1);
        assert_eq!(workbook.sheets[0].table_name, "Items");
    }
}
