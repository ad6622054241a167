use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use sheetsync::EnumAccumulator;
use std::collections::{BTreeMap, HashSet};

use crate::type_utils::{enum_type_name, enum_variant_name, needs_rename};

/// Variant used for an enum column that never held a value.
pub(crate) const UNSET_VARIANT: &str = "Unset";

/// Generate one enum per Rust type name, in type name order.
///
/// Keys whose field names map to the same type (`rarity`, `Rarity`) become one
/// enum: the first key in key order names the field and values are joined in
/// key order without duplicates.
pub fn generate_enums(enums: &EnumAccumulator) -> TokenStream {
    let mut tokens = TokenStream::new();
    for (field_name, values) in fold_by_type(enums).into_values() {
        tokens.extend(generate_value_enum(field_name, &values));
    }
    tokens
}

fn fold_by_type(enums: &EnumAccumulator) -> BTreeMap<String, (&str, Vec<String>)> {
    let mut folded: BTreeMap<String, (&str, Vec<String>)> = BTreeMap::new();
    for (key, values) in enums.iter() {
        let field_name = EnumAccumulator::field_name(key);
        let (_, merged) = folded
            .entry(enum_type_name(field_name))
            .or_insert_with(|| (field_name, Vec::new()));
        for value in values {
            if !merged.contains(value) {
                merged.push(value.clone());
            }
        }
    }
    folded
}

/// Pair each raw value with a unique variant identifier, in value order.
fn variant_idents(values: &[String]) -> Vec<(proc_macro2::Ident, String)> {
    let mut used = HashSet::new();
    let mut variants = Vec::with_capacity(values.len());
    for value in values {
        let base = enum_variant_name(value);
        let mut name = base.clone();
        let mut suffix = 2;
        while !used.insert(name.clone()) {
            name = format!("{base}{suffix}");
            suffix += 1;
        }
        variants.push((format_ident!("{}", name), value.clone()));
    }
    variants
}

/// Generate a value enum like `Rarity { Common, Rare }`.
///
/// The first value is the default. Values that are not valid identifiers keep
/// their spelling through `#[serde(rename)]`, `as_str` and `FromStr`.
fn generate_value_enum(field_name: &str, values: &[String]) -> TokenStream {
    let type_name = enum_type_name(field_name);
    let type_ident = format_ident!("{}", type_name);

    let mut variants = variant_idents(values);
    if variants.is_empty() {
        variants.push((format_ident!("{}", UNSET_VARIANT), String::new()));
    }

    let declarations = variants.iter().enumerate().map(|(i, (ident, raw))| {
        let default = (i == 0).then(|| quote! { #[default] });
        let rename = needs_rename(ident, raw).then(|| quote! { #[serde(rename = #raw)] });
        quote! { #default #rename #ident }
    });
    let all = variants.iter().map(|(ident, _)| quote! { Self::#ident });
    let as_str_arms = variants
        .iter()
        .map(|(ident, raw)| quote! { Self::#ident => #raw });
    let from_str_arms = variants
        .iter()
        .map(|(ident, raw)| quote! { #raw => Ok(Self::#ident) });
    let error = format!("unknown {type_name} value '{{}}'");

    quote! {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum #type_ident {
            #(#declarations),*
        }

        impl #type_ident {
            /// Spreadsheet field the values were collected from.
            pub const FIELD: &'static str = #field_name;

            pub const ALL: &'static [Self] = &[#(#all),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    #(#as_str_arms),*
                }
            }
        }

        impl std::str::FromStr for #type_ident {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    #(#from_str_arms,)*
                    other => Err(format!(#error, other)),
                }
            }
        }

        impl std::fmt::Display for #type_ident {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    }
}
