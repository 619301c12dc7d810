use std::sync::Arc;

use velithon_core::di::{BeanContext, BeanRegistry};
use velithon_core::error::VelithonError;
use velithon_core::guards::{Guard, GuardContext, Identity, NoIdentity, RolesGuard};
use velithon_core::scope::{ProtocolKind, Scope};

use http::{HeaderMap, Method};

struct TestIdentity {
    sub: String,
    roles: Vec<String>,
    email: Option<String>,
    claims: Option<serde_json::Value>,
}

impl TestIdentity {
    fn new(sub: &str, roles: &[&str]) -> Self {
        Self {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            email: None,
            claims: None,
        }
    }

    fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

impl Identity for TestIdentity {
    fn sub(&self) -> &str {
        &self.sub
    }
    fn roles(&self) -> &[String] {
        &self.roles
    }
    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
    fn claims(&self) -> Option<&serde_json::Value> {
        self.claims.as_ref()
    }
}

fn test_scope(path: &str, query: Option<&str>) -> Scope {
    Scope::new(
        ProtocolKind::Http,
        Method::GET,
        path.into(),
        query.map(|q| q.to_string()),
        HeaderMap::new(),
        None,
        "req".into(),
    )
}

fn test_beans() -> Arc<BeanContext> {
    Arc::new(BeanContext::new(Arc::new(BeanRegistry::new())))
}

fn make_ctx<'a, I: Identity>(
    identity: Option<&'a I>,
    scope: &'a Scope,
    beans: &'a Arc<BeanContext>,
) -> GuardContext<'a, I> {
    GuardContext {
        method_name: "test_method",
        controller_name: "TestController",
        scope,
        identity,
        beans,
    }
}

// NoIdentity tests
#[test]
fn no_identity_sub_is_empty() {
    assert_eq!(NoIdentity.sub(), "");
}

#[test]
fn no_identity_roles_is_empty() {
    assert!(NoIdentity.roles().is_empty());
}

// GuardContext accessor tests
#[test]
fn guard_context_identity_sub() {
    let id = TestIdentity::new("user-1", &["admin"]);
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    assert_eq!(ctx.identity_sub(), Some("user-1"));
}

#[test]
fn guard_context_identity_roles() {
    let id = TestIdentity::new("user-1", &["admin", "editor"]);
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    let roles = ctx.identity_roles().unwrap();
    assert_eq!(roles.len(), 2);
    assert_eq!(roles[0], "admin");
    assert_eq!(roles[1], "editor");
}

#[test]
fn guard_context_identity_email() {
    let id = TestIdentity::new("user-1", &[]).with_email("a@b.com");
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    assert_eq!(ctx.identity_email(), Some("a@b.com"));
}

#[test]
fn guard_context_identity_none() {
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx: GuardContext<'_, TestIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.identity_sub(), None);
    assert_eq!(ctx.identity_roles(), None);
    assert_eq!(ctx.identity_email(), None);
}

#[test]
fn guard_context_path() {
    let scope = test_scope("/users", Some("q=1"));
    let beans = test_beans();
    let ctx: GuardContext<'_, NoIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.path(), "/users");
}

#[test]
fn guard_context_query_string() {
    let scope = test_scope("/users", Some("q=1"));
    let beans = test_beans();
    let ctx: GuardContext<'_, NoIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.query_string(), Some("q=1"));
}

#[test]
fn guard_context_path_param() {
    let mut scope = test_scope("/users/42", None);
    scope
        .path_params
        .insert("id".into(), velithon_core::pattern::CapturedValue::Str("42".into()));
    let beans = test_beans();
    let ctx: GuardContext<'_, NoIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.path_param("id").map(|v| v.to_string()), Some("42".into()));
    assert_eq!(ctx.path_param("missing"), None);
}

// RolesGuard tests
#[tokio::test]
async fn roles_guard_passes() {
    let guard = RolesGuard {
        required_roles: &["admin"],
    };
    let id = TestIdentity::new("user-1", &["admin", "user"]);
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    let result = guard.check(&ctx).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn roles_guard_rejects() {
    let guard = RolesGuard {
        required_roles: &["admin"],
    };
    let id = TestIdentity::new("user-1", &["user"]);
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    let result = guard.check(&ctx).await;
    assert!(matches!(result, Err(VelithonError::Forbidden(_))));
}

#[test]
fn guard_context_method_name() {
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx: GuardContext<'_, NoIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.method_name, "test_method");
}

#[test]
fn guard_context_controller_name() {
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx: GuardContext<'_, NoIdentity> = make_ctx(None, &scope, &beans);
    assert_eq!(ctx.controller_name, "TestController");
}

#[test]
fn guard_context_identity_claims() {
    let claims = serde_json::json!({"aud": "test-app", "scope": "read"});
    let mut id = TestIdentity::new("user-1", &["admin"]);
    id.claims = Some(claims.clone());
    let scope = test_scope("/test", None);
    let beans = test_beans();
    let ctx = make_ctx(Some(&id), &scope, &beans);
    assert_eq!(ctx.identity_claims(), Some(&claims));
}
