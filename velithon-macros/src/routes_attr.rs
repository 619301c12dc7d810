//! `#[routes] impl ControllerName { ... }` — the handler-registration
//! attribute macro (C5/C12). Classifies each handler's parameters (via
//! `routes_parsing`), generates per-parameter resolution code against
//! `velithon_core::resolver`'s free functions, wires up
//! `#[pre_guard]`/`#[roles]`/`#[guard]`/`#[intercept]`, and emits both the
//! cleaned-up inherent `impl` (handlers keep their original bodies) and the
//! `impl Controller for ControllerName` that registers every route.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemImpl};

use crate::crate_path::velithon_core_path;
use crate::routes_parsing;
use crate::types::{RouteMethodDef, RoutesImplDef, ScalarShape, Wrapper};

pub fn expand(attr: TokenStream, input: TokenStream) -> TokenStream {
    let item_impl = parse_macro_input!(input as ItemImpl);
    match routes_parsing::parse(item_impl, attr) {
        Ok(def) => generate(&def).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(def: &RoutesImplDef) -> TokenStream2 {
    let self_ty = &def.self_ty;
    let core = velithon_core_path();
    let self_name = quote!(#self_ty).to_string();

    let passthrough = &def.passthrough;

    let handler_methods: Vec<TokenStream2> = def.routes.iter().map(|r| r.item.clone()).map(|item| quote!(#item)).collect();

    let registrations: Vec<TokenStream2> = def
        .routes
        .iter()
        .map(|route| generate_registration(route, self_ty, &self_name, &def.identity_ty, &core))
        .collect();

    let meta_entries: Vec<TokenStream2> = def
        .routes
        .iter()
        .map(|route| generate_meta_entry(route, &core))
        .collect();

    quote! {
        impl #self_ty {
            #(#passthrough)*
            #(#handler_methods)*
        }

        impl #core::controller::Controller for #self_ty {
            fn register(router: &mut #core::route::Router) -> Result<(), #core::route::RouteError> {
                #(#registrations)*
                Ok(())
            }

            fn register_meta(registry: &mut #core::meta::MetaRegistry) {
                #(#meta_entries)*
            }

            fn name() -> &'static str {
                #self_name
            }
        }
    }
}

fn method_str(route: &RouteMethodDef, core: &TokenStream2) -> TokenStream2 {
    let verb = route.http_method.to_string().to_uppercase();
    quote! { #core::route::Method::from_bytes(#verb.as_bytes()).expect("valid HTTP method") }
}

fn generate_registration(
    route: &RouteMethodDef,
    self_ty: &syn::Type,
    self_name: &str,
    identity_ty: &syn::Type,
    core: &TokenStream2,
) -> TokenStream2 {
    let fn_name = &route.item.sig.ident;
    let fn_name_str = fn_name.to_string();
    let path = &route.path;
    let method_tok = method_str(route, core);
    let handler_label = format!("{self_name}::{fn_name_str}");

    let route_name = match &route.name {
        Some(n) => quote! { Some(#n.to_string()) },
        None => quote! { None },
    };

    let pre_guard_checks: Vec<TokenStream2> = route
        .pre_guards
        .iter()
        .map(|expr| {
            quote! {
                {
                    let __pre_ctx = #core::guards::PreAuthGuardContext {
                        method_name: #fn_name_str,
                        controller_name: #self_name,
                        scope: __ctx.request.scope.as_ref(),
                        beans: &__ctx.beans,
                    };
                    #core::guards::PreAuthGuard::check(&(#expr), &__pre_ctx).await?;
                }
            }
        })
        .collect();

    let needs_identity_ctx = !route.roles.is_empty() || !route.guards.is_empty();
    let identity_prelude = if needs_identity_ctx {
        quote! {
            let __identity: Option<::std::sync::Arc<#identity_ty>> =
                __ctx.request.scope.stash_get::<::std::sync::Arc<#identity_ty>>();
            let __guard_ctx = #core::guards::GuardContext {
                method_name: #fn_name_str,
                controller_name: #self_name,
                scope: __ctx.request.scope.as_ref(),
                identity: __identity.as_deref(),
                beans: &__ctx.beans,
            };
        }
    } else {
        quote! {}
    };

    let roles_check = if route.roles.is_empty() {
        quote! {}
    } else {
        let roles = &route.roles;
        quote! {
            {
                let __roles_guard = #core::guards::RolesGuard { required_roles: &[#(#roles),*] };
                #core::guards::Guard::check(&__roles_guard, &__guard_ctx).await?;
            }
        }
    };

    let guard_checks: Vec<TokenStream2> = route
        .guards
        .iter()
        .map(|expr| {
            quote! {
                #core::guards::Guard::check(&(#expr), &__guard_ctx).await?;
            }
        })
        .collect();

    let param_bindings: Vec<TokenStream2> = route
        .params
        .iter()
        .map(|p| generate_param_binding(p, core))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e: syn::Error| vec![e.to_compile_error()]);

    let call_args: Vec<TokenStream2> = route.params.iter().map(|p| {
        let pat = &p.pat;
        quote! { #pat }
    }).collect();

    let is_async = route.item.sig.asyncness.is_some();
    let call_expr = if is_async {
        quote! { #self_ty::#fn_name(#(#call_args),*).await }
    } else {
        quote! { #self_ty::#fn_name(#(#call_args),*) }
    };

    let mut next_closure = quote! { move || async move { #call_expr } };
    for expr in route.intercepts.iter().rev() {
        next_closure = quote! {
            move || async move {
                let __intercept_ctx = #core::interceptors::InterceptorContext {
                    method_name: #fn_name_str,
                    controller_name: #self_name,
                    beans: &__ctx.beans,
                };
                #core::interceptors::Interceptor::around(&(#expr), __intercept_ctx, #next_closure).await
            }
        };
    }

    quote! {
        router.add_route(
            #path,
            [#method_tok],
            #core::dispatcher::async_handler(#handler_label, move |__ctx: #core::dispatcher::DispatchContext| async move {
                let __outcome: Result<#core::response::Response, #core::error::VelithonError> = async {
                    #(#pre_guard_checks)*
                    #identity_prelude
                    #roles_check
                    #(#guard_checks)*
                    #(#param_bindings)*
                    let __handler_result = (#next_closure)().await;
                    Ok(#core::response::IntoResponse::into_response(__handler_result))
                }.await;
                match __outcome {
                    Ok(resp) => resp,
                    Err(e) => #core::response::IntoResponse::into_response(e),
                }
            }),
            #route_name,
        )?;
    }
}

fn generate_param_binding(param: &crate::types::ParamDef, core: &TokenStream2) -> syn::Result<TokenStream2> {
    let pat = &param.pat;
    let name_str = pat.to_string();

    Ok(match &param.wrapper {
        Wrapper::Path(ty) => quote! {
            let #pat = {
                let __spec = #core::resolver::ParameterSpec {
                    name: #name_str.to_string(),
                    source: #core::resolver::ParameterSource::Path,
                    alias: None,
                    required: true,
                    default: None,
                };
                let __captured = #core::resolver::resolve_path(&__spec, &__ctx.captures)?;
                let __raw = __captured.to_string();
                let __parsed: #ty = <#ty as #core::resolver::ScalarParse>::parse_scalar(&__raw)
                    .map_err(|message| #core::resolver::ResolverError::ConversionFailed {
                        field: #name_str.to_string(),
                        message,
                    })?;
                #core::extract::Path(__parsed)
            };
        },
        Wrapper::Query(shape) => scalar_binding(pat, &name_str, shape, quote!(Query), SourceKind::Query, core),
        Wrapper::Header(shape) => scalar_binding(pat, &name_str, shape, quote!(Header), SourceKind::Header, core),
        Wrapper::Cookie(shape) => scalar_binding(pat, &name_str, shape, quote!(CookieParam), SourceKind::Cookie, core),
        Wrapper::JsonBody(ty) => quote! {
            let #pat = #core::extract::JsonBody(#core::resolver::resolve_body_json::<#ty>(&__ctx.request)?);
        },
        Wrapper::Form(ty) => quote! {
            let #pat = #core::extract::Form(#core::resolver::resolve_form::<#ty>(&__ctx.request)?);
        },
        Wrapper::File => quote! {
            let #pat = {
                let __spec = #core::resolver::ParameterSpec {
                    name: #name_str.to_string(),
                    source: #core::resolver::ParameterSource::File,
                    alias: None,
                    required: true,
                    default: None,
                };
                #core::resolver::resolve_file(&__spec, &__ctx.request).await?
            };
        },
        Wrapper::Provide(ty) => quote! {
            let #pat = #core::extract::Provide(#core::resolver::resolve_dependency::<#ty>(&__ctx.beans).await?);
        },
        Wrapper::RequestObject => quote! {
            let #pat = __ctx.request.as_ref();
        },
        Wrapper::ScopeObject => quote! {
            let #pat = __ctx.request.scope.as_ref();
        },
    })
}

enum SourceKind {
    Query,
    Header,
    Cookie,
}

fn scalar_binding(
    pat: &syn::Ident,
    name_str: &str,
    shape: &ScalarShape,
    wrapper_ident: TokenStream2,
    source: SourceKind,
    core: &TokenStream2,
) -> TokenStream2 {
    let source_variant = match source {
        SourceKind::Query => quote!(#core::resolver::ParameterSource::Query),
        SourceKind::Header => quote!(#core::resolver::ParameterSource::Header),
        SourceKind::Cookie => quote!(#core::resolver::ParameterSource::Cookie),
    };

    match shape {
        ScalarShape::Seq(ty) => {
            // Only reachable for Query; resolve_query_seq does its own per-item ScalarParse.
            quote! {
                let #pat = {
                    let __spec = #core::resolver::ParameterSpec {
                        name: #name_str.to_string(),
                        source: #source_variant,
                        alias: None,
                        required: false,
                        default: None,
                    };
                    #core::extract::#wrapper_ident(#core::resolver::resolve_query_seq::<#ty>(&__spec, &__ctx.request)?)
                };
            }
        }
        ScalarShape::Optional(ty) => {
            let raw_resolve = raw_resolve_call(&source, core);
            quote! {
                let #pat = {
                    let __spec = #core::resolver::ParameterSpec {
                        name: #name_str.to_string(),
                        source: #source_variant,
                        alias: None,
                        required: false,
                        default: None,
                    };
                    let __raw: Option<String> = #raw_resolve;
                    let __parsed: Option<#ty> = match __raw {
                        Some(__s) => Some(<#ty as #core::resolver::ScalarParse>::parse_scalar(&__s)
                            .map_err(|message| #core::resolver::ResolverError::ConversionFailed {
                                field: #name_str.to_string(),
                                message,
                            })?),
                        None => None,
                    };
                    #core::extract::#wrapper_ident(__parsed)
                };
            }
        }
        ScalarShape::Required(ty) => {
            let raw_resolve = raw_resolve_call(&source, core);
            quote! {
                let #pat = {
                    let __spec = #core::resolver::ParameterSpec {
                        name: #name_str.to_string(),
                        source: #source_variant,
                        alias: None,
                        required: true,
                        default: None,
                    };
                    let __raw: Option<String> = #raw_resolve;
                    // `required: true` guarantees `Some` here — the resolver errors
                    // out before returning `None` in that case.
                    let __s = __raw.expect("resolver enforces required params");
                    let __parsed: #ty = <#ty as #core::resolver::ScalarParse>::parse_scalar(&__s)
                        .map_err(|message| #core::resolver::ResolverError::ConversionFailed {
                            field: #name_str.to_string(),
                            message,
                        })?;
                    #core::extract::#wrapper_ident(__parsed)
                };
            }
        }
    }
}

fn raw_resolve_call(source: &SourceKind, core: &TokenStream2) -> TokenStream2 {
    match source {
        SourceKind::Query => quote! {
            #core::resolver::resolve_query_scalar::<String>(&__spec, &__ctx.request)?
        },
        SourceKind::Header => quote! {
            #core::resolver::resolve_header(&__spec, &__ctx.request)?
        },
        SourceKind::Cookie => quote! {
            #core::resolver::resolve_cookie(&__spec, &__ctx.request)?
        },
    }
}

fn generate_meta_entry(route: &RouteMethodDef, core: &TokenStream2) -> TokenStream2 {
    let path = &route.path;
    let method = route.http_method.to_string().to_uppercase();
    let fn_name = route.item.sig.ident.to_string();
    let roles = &route.roles;
    let has_auth = !route.roles.is_empty();

    let params: Vec<TokenStream2> = route
        .params
        .iter()
        .filter_map(|p| {
            let (location, required) = match &p.wrapper {
                Wrapper::Path(_) => (quote!(#core::meta::ParamLocation::Path), true),
                Wrapper::Query(ScalarShape::Required(_)) => (quote!(#core::meta::ParamLocation::Query), true),
                Wrapper::Query(_) => (quote!(#core::meta::ParamLocation::Query), false),
                Wrapper::Header(ScalarShape::Required(_)) => (quote!(#core::meta::ParamLocation::Header), true),
                Wrapper::Header(_) => (quote!(#core::meta::ParamLocation::Header), false),
                _ => return None,
            };
            let name = p.pat.to_string();
            Some(quote! {
                #core::meta::ParamInfo {
                    name: #name.to_string(),
                    location: #location,
                    param_type: String::new(),
                    required: #required,
                }
            })
        })
        .collect();

    quote! {
        registry.push(#core::meta::RouteInfo {
            path: #path.to_string(),
            method: #method.to_string(),
            operation_id: #fn_name.to_string(),
            summary: None,
            description: None,
            request_body_type: None,
            request_body_schema: None,
            request_body_required: false,
            response_type: None,
            response_schema: None,
            response_status: 200,
            params: vec![#(#params),*],
            roles: vec![#(#roles.to_string()),*],
            tag: None,
            deprecated: false,
            has_auth: #has_auth,
        });
    }
}
