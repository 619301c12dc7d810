//! `#[derive(Controller)]` — validates a controller is a zero-field marker
//! type (handlers reach services exclusively through the DI container, so a
//! controller carries no state of its own). The actual `impl Controller`
//! is generated by the `#[routes]` attribute on the method block, since only
//! that macro sees the handler set; this derive exists purely to catch a
//! stateful controller at the definition site instead of at first use.

use proc_macro::TokenStream;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match check(&input) {
        Ok(()) => proc_macro2::TokenStream::new().into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn check(input: &DeriveInput) -> syn::Result<()> {
    match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Unit => Ok(()),
            Fields::Named(named) if named.named.is_empty() => Ok(()),
            Fields::Unnamed(unnamed) if unnamed.unnamed.is_empty() => Ok(()),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "#[derive(Controller)] only applies to zero-field marker structs — \
                 handlers reach services through the DI container, never through controller state:\n\
                 \n  #[derive(Controller)]\n  pub struct UserController;",
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "#[derive(Controller)] only applies to structs",
        )),
    }
}
