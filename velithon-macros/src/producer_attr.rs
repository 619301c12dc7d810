//! `#[producer]` on a free function — wraps it in a generated PascalCase
//! marker struct that implements `Provider`, for beans that aren't naturally
//! a `Self::new`-style constructor (e.g. building a connection pool).

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, ReturnType, Type};

use crate::crate_path::velithon_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);
    match generate(&item_fn) {
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

fn generate(item_fn: &ItemFn) -> syn::Result<TokenStream2> {
    let fn_name = &item_fn.sig.ident;
    let is_async = item_fn.sig.asyncness.is_some();
    let krate = velithon_core_path();

    let struct_name = to_pascal_case(&fn_name.to_string());
    let struct_ident = syn::Ident::new(&struct_name, fn_name.span());

    let output_ty = match &item_fn.sig.output {
        ReturnType::Default => {
            return Err(syn::Error::new_spanned(
                fn_name,
                "#[producer] function must have a return type:\n\
                 \n  #[producer]\n  async fn create_pool() -> SqlitePool { ... }",
            ));
        }
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };

    if item_fn.sig.inputs.iter().any(|arg| matches!(arg, FnArg::Receiver(_))) {
        return Err(syn::Error::new_spanned(
            fn_name,
            "#[producer] must be a free function (no `self` parameter):\n\
             \n  #[producer]\n  async fn create_pool(#[config(\"app.db.url\")] url: String) -> SqlitePool { ... }",
        ));
    }

    let mut dep_type_ids = Vec::new();
    let mut build_args = Vec::new();
    let mut has_config = false;
    let mut clean_params: Vec<TokenStream2> = Vec::new();

    for (i, arg) in item_fn.sig.inputs.iter().enumerate() {
        let pat_type = match arg {
            FnArg::Receiver(_) => unreachable!(),
            FnArg::Typed(pt) => pt,
        };
        let ty = &*pat_type.ty;
        let arg_name = syn::Ident::new(&format!("__arg_{i}"), proc_macro2::Span::call_site());

        let config_attr = pat_type.attrs.iter().find(|a| a.path().is_ident("config"));
        if let Some(attr) = config_attr {
            let key: syn::LitStr = attr.parse_args()?;
            let key_str = key.value();
            has_config = true;
            build_args.push(quote! {
                let #arg_name: #ty = __velithon_config.get::<#ty>(#key_str).map_err(|e| {
                    #krate::BeanError::ConstructionFailed(#struct_name.to_string(), format!("config key '{}': {}", #key_str, e))
                })?;
            });
        } else {
            let inner = arc_inner(ty).ok_or_else(|| {
                syn::Error::new_spanned(
                    ty,
                    "#[producer] dependency parameters must be `std::sync::Arc<T>` (matching `BeanContext::resolve`'s return type)",
                )
            })?;
            dep_type_ids.push(quote! { std::any::TypeId::of::<#inner>() });
            build_args.push(quote! { let #arg_name: #ty = __ctx.resolve::<#inner>().await?; });
        }

        let non_config_attrs: Vec<_> = pat_type.attrs.iter().filter(|a| !a.path().is_ident("config")).collect();
        let pat = &pat_type.pat;
        clean_params.push(quote! { #(#non_config_attrs)* #pat: #ty });
    }

    if has_config {
        dep_type_ids.push(quote! { std::any::TypeId::of::<#krate::config::VelithonConfig>() });
    }

    let arg_forwards: Vec<_> = (0..item_fn.sig.inputs.len())
        .map(|i| {
            let arg_name = syn::Ident::new(&format!("__arg_{i}"), proc_macro2::Span::call_site());
            quote! { #arg_name }
        })
        .collect();

    let config_prelude = if has_config {
        quote! { let __velithon_config = __ctx.resolve::<#krate::config::VelithonConfig>().await?; }
    } else {
        quote! {}
    };

    let call = if is_async {
        quote! { #fn_name(#(#arg_forwards),*).await }
    } else {
        quote! { #fn_name(#(#arg_forwards),*) }
    };

    let vis = &item_fn.vis;
    let fn_body = &item_fn.block;
    let fn_asyncness = &item_fn.sig.asyncness;
    let ret_ty = &item_fn.sig.output;

    Ok(quote! {
        #vis #fn_asyncness fn #fn_name(#(#clean_params),*) #ret_ty #fn_body

        #vis struct #struct_ident;

        impl #krate::Provider for #struct_ident {
            type Output = #output_ty;

            async fn provide(__ctx: &#krate::BeanContext) -> Result<Self::Output, #krate::BeanError> {
                #config_prelude
                #(#build_args)*
                Ok(#call)
            }
        }

        impl #struct_ident {
            pub fn __velithon_deps() -> Vec<std::any::TypeId> {
                vec![#(#dep_type_ids),*]
            }
        }
    })
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect()
}
