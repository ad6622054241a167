//! Rebuild an [`EnumAccumulator`] from previously generated enum source, so
//! a shared enum set can be extended instead of replaced.

use sheetsync::{EnumAccumulator, Result, SheetSyncError};
use std::collections::HashMap;
use syn::{Attribute, Expr, ImplItem, Item, Lit, LitStr, Type};

/// Collect every `pub enum Name { .. }` in `source`.
///
/// Each enum is keyed by the field recorded in its `FIELD` constant, or by
/// its type name when there is none. Values are the serialized spellings of
/// the variants in declaration order.
pub fn scan_enums(source: &str) -> Result<EnumAccumulator> {
    let file = syn::parse_file(source)
        .map_err(|e| SheetSyncError::Other(format!("cannot parse enum source: {e}")))?;

    let fields = field_constants(&file.items);
    let mut enums = EnumAccumulator::new();
    for item in &file.items {
        let Item::Enum(item) = item else {
            continue;
        };
        let type_name = item.ident.to_string();
        let field_name = fields.get(&type_name).map_or(type_name.as_str(), String::as_str);
        let key = EnumAccumulator::key_for(field_name);
        enums.open(&key);
        for variant in &item.variants {
            let value = serde_rename(&variant.attrs)?.unwrap_or_else(|| variant.ident.to_string());
            enums.record(&key, &value);
        }
    }
    Ok(enums)
}

/// `impl Name { const FIELD: &str = ".."; }` values by type name.
fn field_constants(items: &[Item]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for item in items {
        let Item::Impl(block) = item else {
            continue;
        };
        if block.trait_.is_some() {
            continue;
        }
        let Type::Path(self_ty) = block.self_ty.as_ref() else {
            continue;
        };
        let Some(type_name) = self_ty.path.get_ident() else {
            continue;
        };
        for impl_item in &block.items {
            let ImplItem::Const(constant) = impl_item else {
                continue;
            };
            if constant.ident != "FIELD" {
                continue;
            }
            if let Expr::Lit(expr) = &constant.expr {
                if let Lit::Str(value) = &expr.lit {
                    fields.insert(type_name.to_string(), value.value());
                }
            }
        }
    }
    fields
}

fn serde_rename(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut rename = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                rename = Some(value.value());
            }
            Ok(())
        })
        .map_err(|e| SheetSyncError::Other(format!("bad serde attribute: {e}")))?;
    }
    Ok(rename)
}
