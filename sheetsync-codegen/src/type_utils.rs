use heck::{ToPascalCase, ToSnakeCase};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetsync::schema::{ColumnSpec, FieldType};

/// Keep only identifier characters and make sure the result does not start
/// with a digit.
fn sanitize(raw: &str, digit_prefix: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.is_empty() {
        fallback.to_string()
    } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("{digit_prefix}{cleaned}")
    } else {
        cleaned
    }
}

/// Struct name for a table. e.g. "item_stats" -> "ItemStats"
pub fn record_struct_name(table_name: &str) -> String {
    sanitize(&table_name.to_pascal_case(), "T", "Record")
}

/// Module (and file stem) for a table. e.g. "ItemStats" -> "item_stats"
pub fn record_module_name(table_name: &str) -> String {
    let name = sanitize(&table_name.to_snake_case(), "t_", "record");
    if is_keyword(&name) {
        format!("{name}_")
    } else {
        name
    }
}

/// Enum type name for an enum column. e.g. "weapon kind" -> "WeaponKind"
pub fn enum_type_name(field_name: &str) -> String {
    let name = sanitize(&field_name.to_pascal_case(), "E", "Value");
    if name == "Self" {
        "SelfKind".to_string()
    } else {
        name
    }
}

/// Variant name for a raw enum value. e.g. "dark blue" -> "DarkBlue"
pub fn enum_variant_name(value: &str) -> String {
    let name = sanitize(&value.to_pascal_case(), "V", "Value");
    if name == "Self" {
        "SelfValue".to_string()
    } else {
        name
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "self" | "super" | "crate"
            | "mod" | "use" | "pub" | "impl" | "trait" | "for" | "loop" | "while" | "if"
            | "else" | "match" | "return" | "break" | "continue" | "as" | "in" | "where"
            | "async" | "await" | "dyn" | "move" | "static" | "const" | "unsafe" | "extern"
            | "true" | "false" | "abstract" | "become" | "box" | "do" | "final" | "macro"
            | "override" | "priv" | "typeof" | "unsized" | "virtual" | "yield" | "try"
    )
}

/// Field identifier for a column, using raw identifier syntax for keywords.
///
/// `self`, `super` and `crate` cannot be raw identifiers and get a trailing
/// underscore instead.
pub fn safe_field_ident(name: &str) -> proc_macro2::Ident {
    let snake = sanitize(&name.to_snake_case(), "f_", "field");
    match snake.as_str() {
        "self" | "super" | "crate" => format_ident!("{}_", snake),
        s if is_keyword(s) => format_ident!("r#{}", s),
        _ => format_ident!("{}", snake),
    }
}

/// The companion list field of an array column. e.g. "Tags" -> "tags_list"
pub fn list_field_ident(name: &str) -> proc_macro2::Ident {
    let snake = sanitize(&name.to_snake_case(), "f_", "field");
    format_ident!("{}_list", snake)
}

/// Rust type of a single element of a column.
pub fn element_rust_type(column: &ColumnSpec) -> TokenStream {
    match column.declared_type.element() {
        FieldType::Int => quote! { i64 },
        FieldType::Float => quote! { f64 },
        FieldType::Text => quote! { String },
        FieldType::Enum => {
            let ident = format_ident!(
                "{}",
                enum_type_name(column.enum_name.as_deref().unwrap_or(&column.name))
            );
            quote! { #ident }
        }
    }
}

/// Rust type of the stored field: the element type for scalars, the JSON
/// text for arrays.
pub fn stored_rust_type(column: &ColumnSpec) -> TokenStream {
    if column.is_array() {
        quote! { String }
    } else {
        element_rust_type(column)
    }
}

/// Whether the serialized name of an identifier differs from `raw`.
pub fn needs_rename(ident: &proc_macro2::Ident, raw: &str) -> bool {
    ident.to_string().trim_start_matches("r#") != raw
}
