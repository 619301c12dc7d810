pub mod builder;
pub mod config;
pub mod context;
pub mod controller;
#[cfg(feature = "dev-reload")]
pub mod dev;
pub mod di;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod guards;
pub mod health;
pub mod interceptors;
pub mod lifecycle;
pub mod meta;
pub mod middleware;
#[cfg(feature = "multipart")]
pub mod multipart;
pub mod params;
pub mod pattern;
pub mod plugin;
pub mod plugins;
pub mod prelude;
pub mod request_id;
pub mod resolver;
pub mod response;
pub mod route;
pub mod scope;
pub mod secure_headers;
pub mod server;
pub mod service;
pub mod types;
#[cfg(feature = "validation")]
pub mod validation;

pub use builder::{App, AppBuilder, Server};
pub use config::{
    register_section, registered_sections, validate_keys, validate_section, ConfigError,
    ConfigProperties, ConfigValidationError, ConfigValue, DefaultSecretResolver, FromConfigValue,
    MissingKeyError, PropertyMeta, RegisteredSection, SecretResolver, VelithonConfig,
};
pub use context::{AppContext, ContextError};
pub use controller::Controller;
pub use di::{BeanContext, BeanError, BeanRegistry, Lifecycle, Provider};
pub use dispatcher::{
    async_handler, blocking_handler, render_resolver_error, AsyncHandlerFn, BlockingHandlerFn,
    BoxedHandler, DispatchContext, HandlerEntry, HandlerKind,
};
pub use error::{FieldError, VelithonError};
pub use extract::{CookieParam, Form, Header, JsonBody, Path, Provide, Query, UploadedFile};
pub use guards::{Guard, GuardContext, Identity, NoIdentity, PreAuthGuard, PreAuthGuardContext, RolesGuard};
pub use health::{
    HealthBuilder, HealthCheck, HealthCheckStatus, HealthIndicator, HealthResponse, HealthState,
    HealthStatus,
};
pub use interceptors::{Cacheable, Interceptor, InterceptorContext};
pub use lifecycle::{shutdown_hook, shutdown_signal, startup_hook, ShutdownHook, StartupHook};
pub use meta::{MetaRegistry, ParamInfo, ParamLocation, RouteInfo};
pub use middleware::{Middleware, Next, Stack};
pub use pattern::{CapturedValue, CompiledPattern, Convertor, PatternError};
pub use plugin::Plugin;
pub use plugins::{
    AdvancedHealth, Cors, CorsBuilder, CorsOrigin, DevReload, ErrorHandling, Health,
    NormalizePath, Tracing,
};
pub use request_id::RequestIdMiddleware;
pub use resolver::{ParameterSource, ParameterSpec, ResolverError, ScalarParse};
pub use response::{Body, Cookie, IntoResponse, Json, Response, SameSite};
pub use route::{MatchResult, Route, RouteError, Router};
pub use scope::{
    Adapter, DefaultRequestIdGenerator, Protocol, ProtocolError, ProtocolKind, Request,
    RequestIdGenerator, Scope,
};
pub use secure_headers::SecureHeaders;
pub use service::ServiceComponent;
pub use types::{ApiResult, JsonResult, StatusResult};

#[cfg(feature = "validation")]
pub use validation::{DefaultFormatter, JsonSchemaFormatter, SimpleFormatter, ValidationErrorFormatter};

#[cfg(feature = "multipart")]
pub use multipart::{FromMultipart, MultipartError, MultipartFields};
