//! Parses a `#[routes] impl ControllerName { ... }` block into a
//! [`RoutesImplDef`]: classifies each HTTP-verb-annotated method's
//! parameters into a [`Wrapper`] and strips the route-specific attributes
//! that won't survive into the emitted inherent `impl`.

use syn::{FnArg, ImplItem, ImplItemFn, ItemImpl, Pat, PathArguments, Type};

use crate::types::{ParamDef, RouteMethodDef, RoutesImplDef, ScalarShape, Wrapper};

const HTTP_VERBS: &[&str] = &["get", "post", "put", "delete", "patch"];

pub fn parse(item_impl: ItemImpl, attr: proc_macro::TokenStream) -> syn::Result<RoutesImplDef> {
    let identity_ty = parse_identity_attr(attr)?;
    let self_ty = (*item_impl.self_ty).clone();

    let mut routes = Vec::new();
    let mut passthrough = Vec::new();

    for item in item_impl.items {
        match item {
            ImplItem::Fn(method) => {
                if let Some(verb) = find_http_verb(&method) {
                    routes.push(parse_route_method(method, verb)?);
                } else {
                    passthrough.push(strip_non_verb_attrs(method));
                }
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "#[routes] impl blocks may only contain methods",
                ));
            }
        }
    }

    Ok(RoutesImplDef {
        self_ty,
        identity_ty,
        routes,
        passthrough,
    })
}

fn parse_identity_attr(attr: proc_macro::TokenStream) -> syn::Result<Type> {
    if attr.is_empty() {
        return Ok(syn::parse_quote!(velithon_core::guards::NoIdentity));
    }
    let attr: proc_macro2::TokenStream = attr.into();
    let mut identity_ty: Option<Type> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("identity") {
            let value = meta.value()?;
            identity_ty = Some(value.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `identity` in #[routes(identity = SomeIdentity)]"))
        }
    });
    syn::parse::Parser::parse2(parser, attr)?;
    Ok(identity_ty.unwrap_or_else(|| syn::parse_quote!(velithon_core::guards::NoIdentity)))
}

fn find_http_verb(method: &ImplItemFn) -> Option<(&'static str, syn::LitStr)> {
    for attr in &method.attrs {
        for verb in HTTP_VERBS {
            if attr.path().is_ident(verb) {
                if let Ok(path) = attr.parse_args::<syn::LitStr>() {
                    return Some((verb, path));
                }
            }
        }
    }
    None
}

fn parse_route_method(method: ImplItemFn, verb: (&'static str, syn::LitStr)) -> syn::Result<RouteMethodDef> {
    let (verb_name, path) = verb;
    let http_method = syn::Ident::new(verb_name, proc_macro2::Span::call_site());

    let mut roles = Vec::new();
    let mut guards = Vec::new();
    let mut pre_guards = Vec::new();
    let mut intercepts = Vec::new();
    let mut name = None;

    for attr in &method.attrs {
        if attr.path().is_ident("roles") {
            roles.extend(attr.parse_args_with(
                syn::punctuated::Punctuated::<syn::LitStr, syn::Token![,]>::parse_terminated,
            )?);
        } else if attr.path().is_ident("guard") {
            guards.push(attr.parse_args::<syn::Expr>()?);
        } else if attr.path().is_ident("pre_guard") {
            pre_guards.push(attr.parse_args::<syn::Expr>()?);
        } else if attr.path().is_ident("intercept") {
            intercepts.push(attr.parse_args::<syn::Expr>()?);
        } else if attr.path().is_ident("name") {
            name = Some(attr.parse_args::<syn::LitStr>()?);
        }
    }

    let params = method
        .sig
        .inputs
        .iter()
        .filter_map(|arg| classify_param(arg).transpose())
        .collect::<syn::Result<Vec<_>>>()?;

    let mut item = method;
    item.attrs.retain(|a| !is_route_attr(a));

    Ok(RouteMethodDef {
        http_method,
        path,
        name,
        roles,
        guards,
        pre_guards,
        intercepts,
        params,
        item,
    })
}

fn is_route_attr(attr: &syn::Attribute) -> bool {
    HTTP_VERBS.iter().any(|v| attr.path().is_ident(v))
        || attr.path().is_ident("roles")
        || attr.path().is_ident("guard")
        || attr.path().is_ident("pre_guard")
        || attr.path().is_ident("intercept")
        || attr.path().is_ident("name")
}

/// Strip route-only attributes from a non-route helper method, in case it
/// accidentally carries leftover markers (e.g. copy-pasted from a handler).
fn strip_non_verb_attrs(mut method: ImplItemFn) -> ImplItemFn {
    method.attrs.retain(|a| !is_route_attr(a));
    method
}

fn classify_param(arg: &FnArg) -> syn::Result<Option<ParamDef>> {
    let pat_type = match arg {
        FnArg::Receiver(_) => return Ok(None),
        FnArg::Typed(pt) => pt,
    };

    let pat = match pat_type.pat.as_ref() {
        Pat::Ident(ident) => ident.ident.clone(),
        other => {
            return Err(syn::Error::new_spanned(
                other,
                "#[routes] handler parameters must be simple identifiers",
            ))
        }
    };

    let ty = pat_type.ty.as_ref();
    let wrapper = classify_wrapper(ty)?;
    Ok(Some(ParamDef { pat, wrapper }))
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(tp) => tp.path.segments.last(),
        _ => None,
    }
}

fn generic_arg(ty: &Type) -> Option<&Type> {
    let seg = last_segment(ty)?;
    if let PathArguments::AngleBracketed(args) = &seg.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn is_named(ty: &Type, name: &str) -> bool {
    last_segment(ty).map(|s| s.ident == name).unwrap_or(false)
}

fn scalar_shape(ty: &Type) -> syn::Result<ScalarShape> {
    if is_named(ty, "Option") {
        let inner = generic_arg(ty)
            .ok_or_else(|| syn::Error::new_spanned(ty, "Option must carry a type argument"))?
            .clone();
        Ok(ScalarShape::Optional(inner))
    } else if is_named(ty, "Vec") {
        let inner = generic_arg(ty)
            .ok_or_else(|| syn::Error::new_spanned(ty, "Vec must carry a type argument"))?
            .clone();
        Ok(ScalarShape::Seq(inner))
    } else {
        Ok(ScalarShape::Required(ty.clone()))
    }
}

fn classify_wrapper(ty: &Type) -> syn::Result<Wrapper> {
    if let Type::Reference(r) = ty {
        return classify_wrapper(r.elem.as_ref());
    }

    let seg = last_segment(ty).ok_or_else(|| {
        syn::Error::new_spanned(
            ty,
            "#[routes] handler parameters must use a velithon_core::extract wrapper type",
        )
    })?;
    let name = seg.ident.to_string();

    match name.as_str() {
        "Path" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "Path must carry a type argument"))?
                .clone();
            Ok(Wrapper::Path(inner))
        }
        "Query" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "Query must carry a type argument"))?;
            Ok(Wrapper::Query(scalar_shape(inner)?))
        }
        "Header" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "Header must carry a type argument"))?;
            match scalar_shape(inner)? {
                ScalarShape::Seq(_) => Err(syn::Error::new_spanned(
                    ty,
                    "Header<Vec<T>> is not supported; use Header<T> for a single value",
                )),
                shape => Ok(Wrapper::Header(shape)),
            }
        }
        "CookieParam" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "CookieParam must carry a type argument"))?;
            match scalar_shape(inner)? {
                ScalarShape::Seq(_) => Err(syn::Error::new_spanned(
                    ty,
                    "CookieParam<Vec<T>> is not supported; use CookieParam<T> for a single value",
                )),
                shape => Ok(Wrapper::Cookie(shape)),
            }
        }
        "JsonBody" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "JsonBody must carry a type argument"))?
                .clone();
            Ok(Wrapper::JsonBody(inner))
        }
        "Form" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "Form must carry a type argument"))?
                .clone();
            Ok(Wrapper::Form(inner))
        }
        "UploadedFile" => Ok(Wrapper::File),
        "Provide" => {
            let inner = generic_arg(ty)
                .ok_or_else(|| syn::Error::new_spanned(ty, "Provide must carry a type argument"))?
                .clone();
            Ok(Wrapper::Provide(inner))
        }
        "Request" => Ok(Wrapper::RequestObject),
        "Scope" => Ok(Wrapper::ScopeObject),
        other => Err(syn::Error::new_spanned(
            ty,
            format!(
                "unrecognized handler parameter wrapper `{other}` — expected one of \
                 Path/Query/Header/CookieParam/JsonBody/Form/UploadedFile/Provide/&Request/&Scope"
            ),
        )),
    }
}
