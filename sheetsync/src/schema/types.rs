use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Element type named in a `Name:Type` header cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Float,
    Text,
    Enum,
}

impl FieldType {
    /// Parse the type half of a header cell. Common aliases are accepted.
    pub fn from_header(raw: &str) -> Option<Self> {
        match raw.trim() {
            "int" | "integer" | "long" => Some(FieldType::Int),
            "float" | "double" | "real" => Some(FieldType::Float),
            "text" | "string" => Some(FieldType::Text),
            "enum" => Some(FieldType::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Text => "text",
            FieldType::Enum => "enum",
        }
    }
}

/// Declared shape of a column after duplicate headers are folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "element")]
pub enum DeclaredType {
    Scalar(FieldType),
    Array(FieldType),
}

impl DeclaredType {
    pub fn element(&self) -> FieldType {
        match self {
            DeclaredType::Scalar(t) | DeclaredType::Array(t) => *t,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, DeclaredType::Array(_))
    }
}

/// SQLite storage class chosen for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical column of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub declared_type: DeclaredType,
    /// Name of the generated enum for enum-typed columns.
    pub enum_name: Option<String>,
    pub sql_type: SqlType,
    /// Source cell indices feeding this column; more than one for arrays.
    pub indices: Vec<usize>,
}

impl ColumnSpec {
    pub fn is_array(&self) -> bool {
        self.declared_type.is_array()
    }

    /// `name NOT NULL` fragment used in the DDL.
    pub fn ddl_fragment(&self) -> String {
        format!("{} {} NOT NULL", self.name, self.sql_type)
    }
}

/// Inferred schema and row literals for one sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    /// Column definitions, without the surrounding `CREATE TABLE name (...)`.
    pub ddl: String,
    /// One `('v1', 'v2', ...)` tuple per data row.
    pub insert_literals: Vec<String>,
}

impl SheetSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Distinct enum values per enum field, in first-seen order.
///
/// Keys have the form `Field:enum` and are kept sorted so every consumer
/// iterates them in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumAccumulator {
    entries: BTreeMap<String, Vec<String>>,
}

impl EnumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Color` -> `Color:enum`
    pub fn key_for(field_name: &str) -> String {
        format!("{field_name}:enum")
    }

    /// `Color:enum` -> `Color`
    pub fn field_name(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }

    /// Open an (initially empty) entry if the key is not known yet.
    pub fn open(&mut self, key: &str) {
        self.entries.entry(key.to_string()).or_default();
    }

    /// Record a value for an already opened key.
    ///
    /// Empty values, duplicates and unknown keys are ignored. Returns whether
    /// the value was appended.
    pub fn record(&mut self, key: &str, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self.entries.get_mut(key) {
            Some(values) if !values.iter().any(|v| v == value) => {
                values.push(value.to_string());
                true
            }
            _ => false,
        }
    }

    /// Fold another accumulator into this one, keeping first-seen order.
    pub fn merge(&mut self, other: &EnumAccumulator) {
        for (key, values) in &other.entries {
            self.open(key);
            for value in values {
                self.record(key, value);
            }
        }
    }

    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
