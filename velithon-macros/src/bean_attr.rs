//! `#[bean]` on an `impl Block` — generates a `Provider` impl that resolves
//! the constructor's dependency parameters through the DI container (C6).
//!
//! Dependency parameters must be written as `Arc<Dep>`, matching
//! `BeanContext::resolve`'s return type; `#[config("app.key")]` parameters
//! are pulled from a DI-registered `VelithonConfig` bean instead.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, ImplItem, ItemImpl, ReturnType, Type};

use crate::crate_path::velithon_core_path;

pub fn expand(input: TokenStream) -> TokenStream {
    let item_impl = parse_macro_input!(input as ItemImpl);
    match generate(&item_impl) {
        Ok(provider_impl) => {
            let cleaned_impl = strip_config_attrs_from_constructor(&item_impl);
            let output = quote! {
                #cleaned_impl
                #provider_impl
            };
            output.into()
        }
        Err(err) => err.to_compile_error().into(),
    }
}

/// Unwrap `Arc<T>` to `T`, for dependency parameters.
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

fn generate(item_impl: &ItemImpl) -> syn::Result<TokenStream2> {
    let self_ty = &item_impl.self_ty;
    let krate = velithon_core_path();

    let (constructor, is_async) = find_constructor(item_impl)?;
    let fn_name = &constructor.sig.ident;
    let type_name_str = quote!(#self_ty).to_string();

    let mut dep_type_ids = Vec::new();
    let mut build_args = Vec::new();
    let mut has_config = false;

    for (i, arg) in constructor.sig.inputs.iter().enumerate() {
        let pat_type = match arg {
            FnArg::Receiver(r) => {
                return Err(syn::Error::new_spanned(
                    r,
                    "#[bean] constructor must be a static associated function (no `self` parameter):\n\
                     \n  fn new(dep: std::sync::Arc<MyDependency>) -> Self {\n      Self { dep }\n  }",
                ));
            }
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
                    #krate::BeanError::ConstructionFailed(#type_name_str.to_string(), format!("config key '{}': {}", #key_str, e))
                })?;
            });
        } else {
            let inner = arc_inner(ty).ok_or_else(|| {
                syn::Error::new_spanned(
                    ty,
                    "#[bean] dependency parameters must be `std::sync::Arc<T>` (matching `BeanContext::resolve`'s return type)",
                )
            })?;
            dep_type_ids.push(quote! { std::any::TypeId::of::<#inner>() });
            build_args.push(quote! { let #arg_name: #ty = __ctx.resolve::<#inner>().await?; });
        }
    }

    if has_config {
        dep_type_ids.push(quote! { std::any::TypeId::of::<#krate::config::VelithonConfig>() });
    }

    let arg_forwards: Vec<_> = (0..constructor.sig.inputs.len())
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
        quote! { Self::#fn_name(#(#arg_forwards),*).await }
    } else {
        quote! { Self::#fn_name(#(#arg_forwards),*) }
    };

    Ok(quote! {
        impl #krate::Provider for #self_ty {
            type Output = #self_ty;

            async fn provide(__ctx: &#krate::BeanContext) -> Result<Self::Output, #krate::BeanError> {
                #config_prelude
                #(#build_args)*
                Ok(#call)
            }
        }

        impl #self_ty {
            /// Dependency `TypeId`s this bean's constructor requires,
            /// intended for `AppBuilder::register_provider::<Self>(Self::__velithon_deps())`.
            pub fn __velithon_deps() -> Vec<std::any::TypeId> {
                vec![#(#dep_type_ids),*]
            }
        }
    })
}

fn find_constructor(item_impl: &ItemImpl) -> syn::Result<(&syn::ImplItemFn, bool)> {
    for item in &item_impl.items {
        if let ImplItem::Fn(method) = item {
            if method.sig.inputs.iter().any(|arg| matches!(arg, FnArg::Receiver(_))) {
                continue;
            }
            if returns_self(&method.sig.output, &item_impl.self_ty) {
                let is_async = method.sig.asyncness.is_some();
                return Ok((method, is_async));
            }
        }
    }

    Err(syn::Error::new_spanned(
        &item_impl.self_ty,
        "#[bean] requires a constructor — a static method returning Self:\n\
         \n  #[bean]\n  impl MyService {\n      fn new(dep: std::sync::Arc<OtherService>) -> Self {\n          Self { dep }\n      }\n  }",
    ))
}

fn returns_self(ret: &ReturnType, self_ty: &Type) -> bool {
    match ret {
        ReturnType::Default => false,
        ReturnType::Type(_, ty) => {
            if let Type::Path(tp) = ty.as_ref() {
                if tp.path.is_ident("Self") {
                    return true;
                }
                if let Type::Path(self_tp) = self_ty {
                    if tp.path.segments.last().map(|s| &s.ident) == self_tp.path.segments.last().map(|s| &s.ident) {
                        return true;
                    }
                }
            }
            false
        }
    }
}

/// Strip `#[config(...)]` attributes from the constructor parameters in the emitted impl block.
fn strip_config_attrs_from_constructor(item_impl: &ItemImpl) -> TokenStream2 {
    let mut items: Vec<TokenStream2> = Vec::new();

    for item in &item_impl.items {
        if let ImplItem::Fn(method) = item {
            let is_constructor = !method.sig.inputs.iter().any(|arg| matches!(arg, FnArg::Receiver(_)))
                && returns_self(&method.sig.output, &item_impl.self_ty);

            if is_constructor {
                let vis = &method.vis;
                let sig_ident = &method.sig.ident;
                let sig_asyncness = &method.sig.asyncness;
                let sig_output = &method.sig.output;
                let body = &method.block;
                let attrs = &method.attrs;

                let clean_params: Vec<TokenStream2> = method
                    .sig
                    .inputs
                    .iter()
                    .map(|arg| match arg {
                        FnArg::Receiver(r) => quote! { #r },
                        FnArg::Typed(pt) => {
                            let non_config_attrs: Vec<_> =
                                pt.attrs.iter().filter(|a| !a.path().is_ident("config")).collect();
                            let pat = &pt.pat;
                            let ty = &pt.ty;
                            quote! { #(#non_config_attrs)* #pat: #ty }
                        }
                    })
                    .collect();

                items.push(quote! {
                    #(#attrs)*
                    #vis #sig_asyncness fn #sig_ident(#(#clean_params),*) #sig_output #body
                });
            } else {
                items.push(quote! { #method });
            }
        } else {
            items.push(quote! { #item });
        }
    }

    let self_ty = &item_impl.self_ty;
    let (impl_generics, _, where_clause) = item_impl.generics.split_for_impl();
    let attrs = &item_impl.attrs;

    quote! {
        #(#attrs)*
        impl #impl_generics #self_ty #where_clause {
            #(#items)*
        }
    }
}
