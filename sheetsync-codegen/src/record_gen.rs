use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use sheetsync::SheetSchema;
use std::collections::HashSet;

use crate::type_utils::{
    element_rust_type, list_field_ident, needs_rename, record_struct_name, safe_field_ident,
    stored_rust_type,
};

/// Make `ident` unique among `used` by appending 2, 3, ...
fn claim(ident: Ident, used: &mut HashSet<String>) -> Ident {
    let base = ident.to_string().trim_start_matches("r#").to_string();
    if used.insert(base.clone()) {
        return ident;
    }
    let mut suffix = 2;
    loop {
        let name = format!("{base}{suffix}");
        if used.insert(name.clone()) {
            return format_ident!("{}", name);
        }
        suffix += 1;
    }
}

/// Field identifiers per column: the stored field and, for arrays, the list
/// field. Stored fields are claimed first so a column never loses its name to
/// another column's list field.
fn field_idents(sheet: &SheetSchema) -> Vec<(Ident, Option<Ident>)> {
    let mut used = HashSet::new();
    let stored: Vec<Ident> = sheet
        .columns
        .iter()
        .map(|c| claim(safe_field_ident(&c.name), &mut used))
        .collect();
    sheet
        .columns
        .iter()
        .zip(stored)
        .map(|(column, ident)| {
            let list = column
                .is_array()
                .then(|| claim(list_field_ident(&column.name), &mut used));
            (ident, list)
        })
        .collect()
}

/// Generate the record struct for one sheet.
///
/// Columns keep their sheet order. Array columns store their JSON text and
/// get a companion `*_list` field that `on_loaded` fills. Colliding field
/// names get a numeric suffix and keep their column name through serde.
pub fn generate_record(sheet: &SheetSchema) -> TokenStream {
    let struct_ident = format_ident!("{}", record_struct_name(&sheet.table_name));
    let table_name = &sheet.table_name;
    let doc_comment = format!(" One row of the `{table_name}` table.");

    let mut fields = Vec::new();
    let mut params = Vec::new();
    let mut assigns = Vec::new();
    let mut hooks = Vec::new();

    for (column, (ident, list_ident)) in sheet.columns.iter().zip(field_idents(sheet)) {
        let ty = stored_rust_type(column);
        let raw = &column.name;
        let rename = needs_rename(&ident, raw).then(|| quote! { #[serde(rename = #raw)] });

        fields.push(quote! {
            #rename
            pub #ident: #ty,
        });
        params.push(quote! { #ident: #ty });
        assigns.push(quote! { #ident });

        if let Some(list_ident) = list_ident {
            let element = element_rust_type(column);
            fields.push(quote! {
                #[serde(skip)]
                pub #list_ident: Vec<#element>,
            });
            hooks.push(quote! {
                self.#list_ident = if self.#ident.is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_str::<Vec<String>>(&self.#ident)?
                        .iter()
                        .map(|v| v.parse::<#element>())
                        .collect::<Result<Vec<_>, _>>()?
                };
            });
        }
    }

    let rest = (!hooks.is_empty()).then(|| quote! { ..Default::default() });

    quote! {
        #[doc = #doc_comment]
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct #struct_ident {
            #(#fields)*
        }

        impl #struct_ident {
            pub const TABLE_NAME: &'static str = #table_name;

            #[allow(clippy::too_many_arguments)]
            pub fn new(#(#params),*) -> Self {
                Self {
                    #(#assigns,)*
                    #rest
                }
            }

            /// Rebuild the list fields from their JSON text. Call after loading a row.
            pub fn on_loaded(&mut self) -> Result<(), Box<dyn std::error::Error>> {
                #(#hooks)*
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsync::schema::{infer_sheet, EnumAccumulator, MemorySheets};

    fn sheet(rows: &[&[&str]]) -> SheetSchema {
        let mut source = MemorySheets::from_strings(&[rows]);
        infer_sheet(&mut source, "Items", &mut EnumAccumulator::new()).unwrap()
    }

    #[test]
    fn test_scalar_record() {
        let code = generate_record(&sheet(&[&["Id:int", "Name:text", "Weight:float"], &["1", "Sword", "2.5"]]))
            .to_string();

        assert!(code.contains("pub struct Items"));
        assert!(code.contains("pub id : i64"));
        assert!(code.contains("pub name : String"));
        assert!(code.contains("pub weight : f64"));
        assert!(code.contains("rename = \"Id\""));
        assert!(code.contains("TABLE_NAME"));
        assert!(code.contains("pub fn new (id : i64 , name : String , weight : f64)"));
        assert!(!code.contains("Default :: default ()"));
    }

    #[test]
    fn test_array_column_gets_list_field_and_hook() {
        let code = generate_record(&sheet(&[&["Id:int", "Tag:int", "Tag:int"], &["1", "4", "5"]]))
            .to_string();

        assert!(code.contains("pub tag : String"));
        assert!(code.contains("pub tag_list : Vec < i64 >"));
        assert!(code.contains("serde (skip)"));
        assert!(code.contains("parse :: < i64 >"));
        assert!(code.contains(".. Default :: default ()"));
    }

    #[test]
    fn test_colliding_field_names_get_suffixes() {
        let code = generate_record(&sheet(&[
            &["Tag:text", "tag:text", "Slot:int", "Slot:int", "SlotList:text"],
            &["a", "b", "1", "2", "x"],
        ]));
        let text = code.to_string();

        assert!(text.contains("pub tag : String"));
        assert!(text.contains("# [serde (rename = \"tag\")] pub tag2 : String"));
        assert!(text.contains("pub slot_list : String"));
        assert!(text.contains("pub slot_list2 : Vec < i64 >"));
        assert!(syn::parse2::<syn::File>(quote! { use serde::{Deserialize, Serialize}; #code }).is_ok());
    }

    #[test]
    fn test_enum_column_uses_enum_type() {
        let code = generate_record(&sheet(&[&["Id:int", "Rarity:enum"], &["1", "Rare"]]))
            .to_string();
        assert!(code.contains("pub rarity : Rarity"));
    }
}
