//! Resolves which crate macro-generated code should reference: a user
//! depending on the `velithon` facade gets `::velithon::core`-prefixed
//! paths, one depending on `velithon-core` directly gets `::velithon_core`.

use proc_macro2::{Span, TokenStream};
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;
use syn::Ident;

/// The path prefix macro-generated code should use to reach `velithon-core`
/// items, resolved once per macro expansion via `Cargo.toml` inspection.
pub fn velithon_core_path() -> TokenStream {
    match crate_name("velithon-core") {
        Ok(FoundCrate::Itself) => quote!(velithon_core),
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Err(_) => match crate_name("velithon") {
            Ok(FoundCrate::Itself) => quote!(velithon::velithon_core),
            Ok(FoundCrate::Name(name)) => {
                let ident = Ident::new(&name, Span::call_site());
                quote!(::#ident::velithon_core)
            }
            Err(_) => quote!(velithon_core),
        },
    }
}
