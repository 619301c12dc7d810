//! `#[derive(Cacheable)]` — a JSON-backed `Cacheable` impl, for values that
//! are also `Serialize + DeserializeOwned`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

use crate::crate_path::velithon_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    generate(&input).into()
}

fn generate(input: &DeriveInput) -> TokenStream2 {
    let name = &input.ident;
    let krate = velithon_core_path();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics #krate::Cacheable for #name #ty_generics #where_clause {
            fn to_cache(&self) -> Option<bytes::Bytes> {
                serde_json::to_vec(self).ok().map(bytes::Bytes::from)
            }

            fn from_cache(bytes: &[u8]) -> Option<Self> {
                serde_json::from_slice(bytes).ok()
            }
        }
    }
}
