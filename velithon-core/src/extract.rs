//! Handler-signature marker types (C5 / AMBIENT-5).
//!
//! Each wrapper here is transparent at runtime — `Deref`/`DerefMut` to the
//! inner value — and exists purely so the route-attribute macro can read a
//! handler's parameter types and classify each one into a `ParameterSource`
//! at registration time (spec.md §4.5 step 2), rather than sniffing
//! parameter names at request time.

use std::ops::{Deref, DerefMut};

/// A path-captured parameter, already typed by its convertor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Path<T>(pub T);

/// A query-string parameter (scalar or, for `Vec<T>`, every repetition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<T>(pub T);

/// A request header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header<T>(pub T);

/// A cookie value from the `Cookie` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieParam<T>(pub T);

/// The request body, deserialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonBody<T>(pub T);

/// The request body, deserialized as `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form<T>(pub T);

/// A single uploaded file from a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: bytes::Bytes,
}

/// A DI-resolved dependency, per AMBIENT-5's `Provide[T]` sigil.
pub struct Provide<T>(pub std::sync::Arc<T>);

impl<T> Deref for Path<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

macro_rules! transparent_wrapper {
    ($name:ident) => {
        impl<T> Deref for $name<T> {
            type Target = T;
            fn deref(&self) -> &T {
                &self.0
            }
        }
        impl<T> DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut T {
                &mut self.0
            }
        }
    };
}

transparent_wrapper!(Query);
transparent_wrapper!(Header);
transparent_wrapper!(CookieParam);
transparent_wrapper!(JsonBody);
transparent_wrapper!(Form);

impl<T> Deref for Provide<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}
