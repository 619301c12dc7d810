//! Route guards (AMBIENT-6).
//!
//! A `Guard` runs after middleware (so path captures are available) but
//! before the handler body. It is the handler-level counterpart of
//! `Interceptor`, which wraps a single handler rather than the whole stack.

use crate::di::BeanContext;
use crate::error::VelithonError;
use crate::pattern::CapturedValue;
use crate::scope::Scope;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait representing an authenticated identity (user, service account, etc.).
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `Identity`",
    label = "this type cannot be used as an identity",
    note = "implement `Identity` for your type"
)]
pub trait Identity: Send + Sync {
    fn sub(&self) -> &str;
    fn roles(&self) -> &[String];
    fn email(&self) -> Option<&str> {
        None
    }
    fn claims(&self) -> Option<&serde_json::Value> {
        None
    }
}

/// Sentinel type representing the absence of an identity.
pub struct NoIdentity;

impl Identity for NoIdentity {
    fn sub(&self) -> &str {
        ""
    }
    fn roles(&self) -> &[String] {
        &[]
    }
}

/// Context available to a guard before the handler body runs. Guards resolve
/// any services they need through `beans` (the same DI container the
/// handler itself will see) rather than a generic application-state
/// parameter.
pub struct GuardContext<'a, I: Identity> {
    pub method_name: &'static str,
    pub controller_name: &'static str,
    pub scope: &'a Scope,
    pub identity: Option<&'a I>,
    pub beans: &'a Arc<BeanContext>,
}

impl<'a, I: Identity> GuardContext<'a, I> {
    pub fn identity_sub(&self) -> Option<&str> {
        self.identity.map(|i| i.sub())
    }

    pub fn identity_roles(&self) -> Option<&[String]> {
        self.identity.map(|i| i.roles())
    }

    pub fn identity_email(&self) -> Option<&str> {
        self.identity.and_then(|i| i.email())
    }

    pub fn identity_claims(&self) -> Option<&serde_json::Value> {
        self.identity.and_then(|i| i.claims())
    }

    pub fn path(&self) -> &str {
        &self.scope.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.scope.raw_query.as_deref()
    }

    pub fn path_params(&self) -> &HashMap<String, CapturedValue> {
        &self.scope.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&CapturedValue> {
        self.scope.path_params.get(name)
    }
}

/// Handler-level guard. Returns `Ok(())` to proceed, `Err(VelithonError)` to
/// short-circuit with that error's rendered response.
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `Guard<{I}>`",
    label = "this type cannot be used as a guard",
    note = "implement `Guard<I>` for your type and apply it with `#[guard(YourGuard)]`"
)]
pub trait Guard<I: Identity>: Send + Sync {
    fn check(
        &self,
        ctx: &GuardContext<'_, I>,
    ) -> impl std::future::Future<Output = Result<(), VelithonError>> + Send;
}

/// Context available to pre-authentication guards — no identity, since
/// these run before JWT extraction/validation.
pub struct PreAuthGuardContext<'a> {
    pub method_name: &'static str,
    pub controller_name: &'static str,
    pub scope: &'a Scope,
    pub beans: &'a Arc<BeanContext>,
}

impl<'a> PreAuthGuardContext<'a> {
    pub fn path(&self) -> &str {
        &self.scope.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.scope.raw_query.as_deref()
    }

    pub fn path_param(&self, name: &str) -> Option<&CapturedValue> {
        self.scope.path_params.get(name)
    }
}

/// Guard that runs before authentication (e.g. IP-based rate limiting),
/// so the request is rejected before paying for JWT validation.
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `PreAuthGuard`",
    label = "this type cannot be used as a pre-auth guard",
    note = "implement `PreAuthGuard` for your type and apply it with `#[pre_guard(YourGuard)]`"
)]
pub trait PreAuthGuard: Send + Sync {
    fn check(
        &self,
        ctx: &PreAuthGuardContext<'_>,
    ) -> impl std::future::Future<Output = Result<(), VelithonError>> + Send;
}

/// Guard that checks required roles. Errors with `Forbidden` if missing.
pub struct RolesGuard {
    pub required_roles: &'static [&'static str],
}

impl<I: Identity> Guard<I> for RolesGuard {
    fn check(
        &self,
        ctx: &GuardContext<'_, I>,
    ) -> impl std::future::Future<Output = Result<(), VelithonError>> + Send {
        let result = (|| {
            let identity = ctx
                .identity
                .ok_or_else(|| VelithonError::Forbidden("no identity available for role check".into()))?;
            let roles = identity.roles();
            let has_role = self
                .required_roles
                .iter()
                .any(|req| roles.iter().any(|r| r.as_str() == *req));
            if has_role {
                Ok(())
            } else {
                Err(VelithonError::Forbidden("insufficient roles".into()))
            }
        })();
        std::future::ready(result)
    }
}
