//! Procedural macros for the Velithon framework: `#[routes]` turns an
//! `impl` block's HTTP-verb-annotated methods into a registered
//! `Controller`, `#[bean]`/`#[producer]`/`#[derive(Bean)]` wire up the DI
//! container, and `#[derive(ConfigProperties)]` / `#[derive(Cacheable)]` /
//! `#[derive(FromMultipart)]` cover the remaining ambient derives.

use proc_macro::TokenStream;

mod bean_attr;
mod bean_derive;
mod cacheable_derive;
mod config_derive;
mod crate_path;
mod derive_controller;
mod from_multipart;
mod producer_attr;
mod routes_attr;
mod routes_parsing;
mod types;

/// Marks a controller struct as a zero-field DI marker type. The actual
/// `Controller` trait impl is emitted by `#[routes]` on the method block.
#[proc_macro_derive(Controller)]
pub fn derive_controller(input: TokenStream) -> TokenStream {
    derive_controller::expand(input)
}

/// `#[routes] impl SomeController { ... }` — registers every
/// `#[get]`/`#[post]`/`#[put]`/`#[delete]`/`#[patch]` method as a route.
/// Accepts `#[routes(identity = SomeIdentity)]` to pick the `Identity` type
/// used by `#[roles]`/`#[guard]` on its methods; defaults to `NoIdentity`.
#[proc_macro_attribute]
pub fn routes(attr: TokenStream, input: TokenStream) -> TokenStream {
    routes_attr::expand(attr, input)
}

macro_rules! route_verb_attr {
    ($name:ident) => {
        /// Consumed by `#[routes]`; marks the method's HTTP verb and path.
        /// A no-op outside a `#[routes]` impl block.
        #[proc_macro_attribute]
        pub fn $name(_attr: TokenStream, input: TokenStream) -> TokenStream {
            input
        }
    };
}

route_verb_attr!(get);
route_verb_attr!(post);
route_verb_attr!(put);
route_verb_attr!(delete);
route_verb_attr!(patch);

macro_rules! route_marker_attr {
    ($name:ident) => {
        /// Consumed by `#[routes]`; a no-op outside a `#[routes]` impl block.
        #[proc_macro_attribute]
        pub fn $name(_attr: TokenStream, input: TokenStream) -> TokenStream {
            input
        }
    };
}

route_marker_attr!(roles);
route_marker_attr!(guard);
route_marker_attr!(pre_guard);
route_marker_attr!(intercept);
route_marker_attr!(name);

/// `#[bean] impl SomeService { fn new(...) -> Self { ... } }` — generates a
/// `Provider` impl resolving constructor dependencies through the DI
/// container.
#[proc_macro_attribute]
pub fn bean(_attr: TokenStream, input: TokenStream) -> TokenStream {
    bean_attr::expand(input)
}

/// `#[producer] fn build_pool(...) -> Pool { ... }` — wraps a free function
/// in a generated `Provider`, for beans that aren't a `Self::new`
/// constructor.
#[proc_macro_attribute]
pub fn producer(_attr: TokenStream, input: TokenStream) -> TokenStream {
    producer_attr::expand(input)
}

/// `#[derive(Bean)]` — generates a `Provider` impl from `#[inject]` /
/// `#[config(...)]` annotated fields.
#[proc_macro_derive(Bean, attributes(inject, config))]
pub fn derive_bean(input: TokenStream) -> TokenStream {
    bean_derive::expand(input)
}

/// `#[derive(ConfigProperties)]` — binds a struct to a `#[config(prefix =
/// "...")]` section of `VelithonConfig`.
#[proc_macro_derive(ConfigProperties, attributes(config))]
pub fn derive_config_properties(input: TokenStream) -> TokenStream {
    config_derive::expand(input)
}

/// `#[derive(Cacheable)]` — a JSON-backed `Cacheable` impl.
#[proc_macro_derive(Cacheable)]
pub fn derive_cacheable(input: TokenStream) -> TokenStream {
    cacheable_derive::expand(input)
}

/// `#[derive(FromMultipart)]` — builds a value out of already-parsed
/// multipart fields.
#[proc_macro_derive(FromMultipart)]
pub fn derive_from_multipart(input: TokenStream) -> TokenStream {
    from_multipart::expand(input)
}
