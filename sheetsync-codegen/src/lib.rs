//! sheetsync code generation - Rust records and enums for inferred sheets.
//!
//! Every sheet becomes one record file, all enum columns share `enums.rs`,
//! and `mod.rs` ties them together so the output directory can be dropped
//! into a crate as a module. Output is deterministic: the same schemas always
//! produce byte-identical files.

mod enum_gen;
mod enum_scan;
mod generator;
mod record_gen;
pub mod type_utils;

use sheetsync::{EnumAccumulator, SheetSchema};
use std::path::{Path, PathBuf};

pub use enum_scan::scan_enums;

pub const ENUMS_FILE: &str = "enums.rs";
pub const MOD_FILE: &str = "mod.rs";

/// File name of the record generated for a table. e.g. "ItemStats" -> "item_stats.rs"
pub fn record_file_name(table_name: &str) -> String {
    format!("{}.rs", type_utils::record_module_name(table_name))
}

/// Source of the record file for one sheet.
pub fn generate_record_source(sheet: &SheetSchema) -> String {
    generator::format_token_stream(&generator::record_tokens(sheet))
}

/// Source of `enums.rs`.
pub fn generate_enums_source(enums: &EnumAccumulator) -> String {
    generator::format_token_stream(&generator::enums_tokens(enums))
}

/// Source of `mod.rs` for the given tables.
pub fn generate_mod_source(table_names: &[String]) -> String {
    generator::format_token_stream(&generator::mod_index_tokens(table_names))
}

/// Write the record file for `sheet` into `dir`.
pub fn write_record(dir: &Path, sheet: &SheetSchema) -> Result<PathBuf, Box<dyn std::error::Error>> {
    write_source(dir, &record_file_name(&sheet.table_name), &generate_record_source(sheet))
}

pub fn write_enums(dir: &Path, enums: &EnumAccumulator) -> Result<PathBuf, Box<dyn std::error::Error>> {
    write_source(dir, ENUMS_FILE, &generate_enums_source(enums))
}

pub fn write_mod_index(
    dir: &Path,
    table_names: &[String],
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    write_source(dir, MOD_FILE, &generate_mod_source(table_names))
}

fn write_source(
    dir: &Path,
    file_name: &str,
    content: &str,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, content)?;
    log::debug!("Wrote {}", path.display());
    Ok(path)
}
