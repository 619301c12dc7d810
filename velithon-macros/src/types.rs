//! Shared parsed-AST types passed between `routes_parsing` and `routes_attr`'s
//! codegen.

use syn::{Expr, Ident, ImplItemFn, LitStr, Type};

/// The wrapper type (from `velithon_core::extract`) a parameter was declared
/// with, classified once at macro-expansion time per the parameter resolver's
/// source algorithm — never sniffed per-request.
pub enum Wrapper {
    Path(Type),
    Query(ScalarShape),
    Header(ScalarShape),
    Cookie(ScalarShape),
    JsonBody(Type),
    Form(Type),
    File,
    Provide(Type),
    /// `&Request` / `Arc<Request>` taken directly rather than through a
    /// wrapper — passed through verbatim.
    RequestObject,
    /// `&Scope` taken directly.
    ScopeObject,
}

/// Shape of a scalar-sourced parameter. `Seq` is only reachable for `Query`
/// — the resolver has no multi-value cookie/header-with-conversion path.
pub enum ScalarShape {
    Required(Type),
    Optional(Type),
    Seq(Type),
}

/// A single handler parameter.
pub struct ParamDef {
    pub pat: syn::Ident,
    pub wrapper: Wrapper,
}

/// One HTTP method attribute recognized on a handler (`#[get("/x")]` etc.).
pub struct RouteMethodDef {
    pub http_method: Ident,
    pub path: LitStr,
    pub name: Option<LitStr>,
    pub roles: Vec<LitStr>,
    pub guards: Vec<Expr>,
    pub pre_guards: Vec<Expr>,
    pub intercepts: Vec<Expr>,
    pub params: Vec<ParamDef>,
    pub item: ImplItemFn,
}

/// The parsed `#[routes] impl ControllerName { ... }` block.
pub struct RoutesImplDef {
    pub self_ty: syn::Type,
    /// `Identity` type used for role/guard checks, from
    /// `#[routes(identity = SomeIdentity)]` — defaults to `NoIdentity`.
    pub identity_ty: Type,
    pub routes: Vec<RouteMethodDef>,
    /// Non-route methods kept verbatim in the emitted `impl` block (helpers
    /// the handlers call, constructors, etc.).
    pub passthrough: Vec<ImplItemFn>,
}
