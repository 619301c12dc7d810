//! Dev-mode support endpoints.
//!
//! When enabled via the [`DevReload`](crate::plugins::DevReload) plugin
//! (feature `dev-reload`), the server exposes:
//! - `GET /__velithon_dev/status` — Returns `"dev"` so tooling/scripts can
//!   detect that the server is running in dev mode.
//! - `GET /__velithon_dev/ping` — Returns a boot-time timestamp; a browser
//!   script can poll it to detect when the server has restarted.
//!
//! Pair with a `cargo-watch`-driven dev loop for a hot-reload development
//! experience: on file change, the old process is killed and a new one
//! started. Clients polling `/__velithon_dev/ping` detect the restart.

use std::sync::OnceLock;
use std::time::SystemTime;

use http::Method;

use crate::dispatcher::{async_handler, BoxedHandler};
use crate::response::IntoResponse;
use crate::route::{RouteError, Router};

#[cfg(feature = "dev-reload")]
use std::collections::HashMap;
#[cfg(feature = "dev-reload")]
use std::sync::Mutex;

#[cfg(feature = "dev-reload")]
static LISTENER_STORE: OnceLock<Mutex<HashMap<String, std::net::TcpListener>>> = OnceLock::new();

/// Retrieve a cached listener for the given address, or bind a new one.
///
/// On first call for a given address, binds a `TcpListener`, stores it, and
/// returns a `try_clone()`. Subsequent calls (after hot-patch) return another
/// clone of the same listener, avoiding port conflicts across restarts that
/// share one OS process (e.g. a supervised dev loop).
#[cfg(feature = "dev-reload")]
pub(crate) fn get_or_bind_listener(
    addr: &str,
) -> Result<tokio::net::TcpListener, Box<dyn std::error::Error>> {
    let store = LISTENER_STORE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = store
        .lock()
        .map_err(|e| format!("listener store poisoned: {e}"))?;
    if let Some(existing) = map.get(addr) {
        Ok(tokio::net::TcpListener::from_std(existing.try_clone()?)?)
    } else {
        let l = std::net::TcpListener::bind(addr)?;
        l.set_nonblocking(true)?;
        let cloned = l.try_clone()?;
        map.insert(addr.to_string(), l);
        Ok(tokio::net::TcpListener::from_std(cloned)?)
    }
}

static BOOT_TIME: OnceLock<u64> = OnceLock::new();

fn boot_time() -> u64 {
    *BOOT_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    })
}

fn status_handler() -> BoxedHandler {
    async_handler("dev_status", |_ctx| async { "dev".into_response() })
}

fn ping_handler() -> BoxedHandler {
    async_handler("dev_ping", |_ctx| async {
        serde_json::json!({ "boot_time": boot_time(), "status": "ok" })
            .to_string()
            .into_response()
    })
}

/// Register the dev-mode endpoints into `router`. Called by the
/// [`DevReload`](crate::plugins::DevReload) plugin.
#[cfg(feature = "dev-reload")]
pub fn register_dev_routes(router: &mut Router) -> Result<(), RouteError> {
    router.add_route("/__velithon_dev/status", [Method::GET], status_handler(), None)?;
    router.add_route("/__velithon_dev/ping", [Method::GET], ping_handler(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_handler_returns_dev() {
        let handler = status_handler();
        let resp = crate::dispatcher::invoke(&handler, test_ctx()).await;
        assert_eq!(resp.status, http::StatusCode::OK);
    }

    fn test_ctx() -> crate::dispatcher::DispatchContext {
        use crate::di::{BeanContext, BeanRegistry};
        use crate::scope::{ProtocolKind, Scope};
        use std::sync::Arc;

        let scope = Arc::new(Scope::new(
            ProtocolKind::Http,
            Method::GET,
            "/".into(),
            None,
            http::HeaderMap::new(),
            None,
            "req".into(),
        ));
        crate::dispatcher::DispatchContext {
            request: Arc::new(crate::scope::Request::new(scope, bytes::Bytes::new())),
            captures: Default::default(),
            beans: Arc::new(BeanContext::new(Arc::new(BeanRegistry::new()))),
        }
    }
}
