//! Single `use velithon_core::prelude::*;` import covering the everyday
//! surface: building an app, handler signatures, responses, and errors.

// ── Macros (from velithon-macros) ───────────────────────────────────────────

pub use velithon_macros::Controller;
pub use velithon_macros::routes;
pub use velithon_macros::{delete, get, patch, post, put};
pub use velithon_macros::{guard, intercept, name, pre_guard, roles};
pub use velithon_macros::{bean, producer, Bean};
pub use velithon_macros::ConfigProperties;
pub use velithon_macros::Cacheable;

#[cfg(feature = "multipart")]
pub use velithon_macros::FromMultipart;

// ── Core types (from velithon-core) ─────────────────────────────────────────

pub use crate::builder::{App, AppBuilder, Server};
pub use crate::config::VelithonConfig;
pub use crate::controller::Controller as ControllerTrait;
pub use crate::di::{BeanContext, BeanError, Lifecycle, Provider};
pub use crate::error::{FieldError, VelithonError};
pub use crate::extract::{CookieParam, Form, Header, JsonBody, Path, Provide, Query, UploadedFile};
pub use crate::guards::{Guard, GuardContext, Identity, NoIdentity, PreAuthGuard, PreAuthGuardContext, RolesGuard};
pub use crate::interceptors::{Cacheable as CacheableTrait, Interceptor, InterceptorContext};
pub use crate::middleware::{Middleware, Next, Stack};
pub use crate::plugin::Plugin;
pub use crate::plugins::{AdvancedHealth, Cors, DevReload, ErrorHandling, Health, NormalizePath, Tracing};
pub use crate::response::{Body, Cookie, IntoResponse, Json, Response, SameSite};
pub use crate::route::{RouteError, Router};
pub use crate::secure_headers::SecureHeaders;
pub use crate::service::ServiceComponent;
pub use crate::types::{ApiResult, JsonResult, StatusResult};

#[cfg(feature = "validation")]
pub use crate::validation::ValidationErrorFormatter;

#[cfg(feature = "multipart")]
pub use crate::multipart::{MultipartError, MultipartFields};
