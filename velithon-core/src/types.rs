//! Convenience type aliases for common handler return types.
//!
//! These aliases reduce verbosity in controller methods:
//!
//! ```ignore
//! use velithon_core::prelude::*;
//!
//! // Before
//! async fn list(&self) -> Result<Json<Vec<User>>, VelithonError> { ... }
//!
//! // After
//! async fn list(&self) -> JsonResult<Vec<User>> { ... }
//! ```

use crate::error::VelithonError;
use crate::response::Json;
use http::StatusCode;

/// Flexible result alias — any response type with [`VelithonError`].
pub type ApiResult<T> = Result<T, VelithonError>;

/// The most common handler return type — `Result<Json<T>, VelithonError>`.
pub type JsonResult<T> = Result<Json<T>, VelithonError>;

/// Shorthand for endpoints that return only a status code (e.g. DELETE).
pub type StatusResult = Result<StatusCode, VelithonError>;
