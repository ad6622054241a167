use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetsync::schema::FieldType;
use sheetsync::{EnumAccumulator, SheetSchema};

use crate::enum_gen::generate_enums;
use crate::record_gen::generate_record;
use crate::type_utils::{record_module_name, record_struct_name};

const HEADER: &str = "// @generated by sheetsync. Do not edit.\n";

/// Pretty-print a token stream, falling back to the raw tokens if it does
/// not parse as a file.
pub fn format_token_stream(tokens: &TokenStream) -> String {
    match syn::parse2::<syn::File>(tokens.clone()) {
        Ok(file) => format!("{HEADER}\n{}", prettyplease::unparse(&file)),
        Err(e) => {
            log::warn!("generated code did not parse ({e}), writing it unformatted");
            format!("{HEADER}\n{tokens}\n")
        }
    }
}

pub fn record_tokens(sheet: &SheetSchema) -> TokenStream {
    let uses_enums = sheet
        .columns
        .iter()
        .any(|c| c.declared_type.element() == FieldType::Enum);
    let enum_import = uses_enums.then(|| quote! { use super::enums::*; });
    let record = generate_record(sheet);

    quote! {
        #enum_import
        use serde::{Deserialize, Serialize};

        #record
    }
}

pub fn enums_tokens(enums: &EnumAccumulator) -> TokenStream {
    let body = generate_enums(enums);
    quote! {
        use serde::{Deserialize, Serialize};

        #body
    }
}

/// `pub mod` declarations and re-exports for the enum file and every table.
pub fn mod_index_tokens(table_names: &[String]) -> TokenStream {
    let mut modules: Vec<(String, String)> = table_names
        .iter()
        .map(|t| (record_module_name(t), record_struct_name(t)))
        .collect();
    modules.sort();
    modules.dedup();

    let mods = modules.iter().map(|(m, _)| format_ident!("{}", m));
    let uses = modules.iter().map(|(m, s)| {
        let module = format_ident!("{}", m);
        let record = format_ident!("{}", s);
        quote! { pub use #module::#record; }
    });

    quote! {
        pub mod enums;
        #(pub mod #mods;)*

        pub use enums::*;
        #(#uses)*
    }
}
