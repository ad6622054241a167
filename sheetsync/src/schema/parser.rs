use super::types::FieldType;
use crate::error::{Result, SheetSyncError};

/// A parsed `Name:Type` header cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
    pub name: String,
    pub field_type: FieldType,
    /// Position of the cell in the sheet row.
    pub index: usize,
}

/// Parse one header cell of `table`.
pub fn parse_header(table: &str, raw: &str, index: usize) -> Result<HeaderCell> {
    let invalid = |reason: &str| SheetSyncError::Schema {
        table: table.to_string(),
        header: raw.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 {
        return Err(invalid("expected Name:Type"));
    }

    let name = parts[0].trim();
    if name.is_empty() {
        return Err(invalid("empty field name"));
    }

    let field_type = FieldType::from_header(parts[1]).ok_or_else(|| invalid("unknown type"))?;

    Ok(HeaderCell {
        name: name.to_string(),
        field_type,
        index,
    })
}
