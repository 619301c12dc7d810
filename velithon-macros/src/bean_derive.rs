//! `#[derive(Bean)]` — generates a `Provider` impl for a struct whose
//! `#[inject]` fields (typed `Arc<T>`) are resolved through the DI
//! container, `#[config("key")]` fields are pulled from a registered
//! `VelithonConfig` bean, and any other field falls back to `Default`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

use crate::crate_path::velithon_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match generate(&input) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn arc_inner(ty: &Type) -> Option<&Type> {
    if let Type::Path(tp) = ty {
        let seg = tp.path.segments.last()?;
        if seg.ident != "Arc" {
            return None;
        }
        if let syn::PathArguments::AngleBracketed(args) = &seg.arguments {
            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                return Some(inner);
            }
        }
    }
    None
}

fn generate(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let name_str = name.to_string();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "#[derive(Bean)] only works on structs with named fields:\n\
                     \n  #[derive(Bean)]\n  struct MyService {\n      #[inject] dep: std::sync::Arc<OtherService>,\n  }",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "#[derive(Bean)] only works on structs — enums and unions are not supported",
            ))
        }
    };

    let krate = velithon_core_path();
    let mut dep_type_ids = Vec::new();
    let mut field_inits = Vec::new();
    let mut has_config = false;

    for field in fields {
        let field_name = field.ident.as_ref().unwrap();
        let field_type = &field.ty;

        let is_inject = field.attrs.iter().any(|a| a.path().is_ident("inject"));
        let config_attr = field.attrs.iter().find(|a| a.path().is_ident("config"));

        if is_inject {
            let inner = arc_inner(field_type).ok_or_else(|| {
                syn::Error::new_spanned(
                    field_type,
                    "#[inject] fields must be `std::sync::Arc<T>` (matching `BeanContext::resolve`'s return type)",
                )
            })?;
            dep_type_ids.push(quote! { std::any::TypeId::of::<#inner>() });
            field_inits.push(quote! { #field_name: __ctx.resolve::<#inner>().await? });
        } else if let Some(attr) = config_attr {
            let key: syn::LitStr = attr.parse_args()?;
            let key_str = key.value();
            has_config = true;
            field_inits.push(quote! {
                #field_name: __velithon_config.get::<#field_type>(#key_str).map_err(|e| {
                    #krate::BeanError::ConstructionFailed(#name_str.to_string(), format!("config key '{}': {}", #key_str, e))
                })?
            });
        } else {
            field_inits.push(quote! { #field_name: Default::default() });
        }
    }

    if has_config {
        dep_type_ids.push(quote! { std::any::TypeId::of::<#krate::config::VelithonConfig>() });
    }

    let config_prelude = if has_config {
        quote! { let __velithon_config = __ctx.resolve::<#krate::config::VelithonConfig>().await?; }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl #krate::Provider for #name {
            type Output = #name;

            async fn provide(__ctx: &#krate::BeanContext) -> Result<Self::Output, #krate::BeanError> {
                #config_prelude
                Ok(Self {
                    #(#field_inits,)*
                })
            }
        }

        impl #name {
            pub fn __velithon_deps() -> Vec<std::any::TypeId> {
                vec![#(#dep_type_ids),*]
            }
        }
    })
}
