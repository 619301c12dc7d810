//! Route table and matcher (C2).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dispatcher::BoxedHandler;
use crate::pattern::{CapturedValue, CompiledPattern, PatternError};

/// HTTP method, deliberately not reusing `http::Method` as the hash key so
/// the route table can do cheap equality/hash without string allocation.
pub type Method = http::Method;

/// A single registered route. Immutable once built; exclusively owned by
/// its `Router`.
pub struct Route {
    pub(crate) pattern: CompiledPattern,
    pub(crate) methods: HashSet<Method>,
    pub(crate) handler: BoxedHandler,
    pub(crate) name: Option<String>,
    pub(crate) error_formatter: Option<Arc<dyn crate::validation::ValidationErrorFormatter>>,
}

impl Route {
    pub fn path(&self) -> &str {
        self.pattern.raw()
    }

    pub fn methods(&self) -> &HashSet<Method> {
        &self.methods
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.pattern.raw())
            .field("methods", &self.methods)
            .field("name", &self.name)
            .finish()
    }
}

/// The result of matching `(method, path)` against a `Router`.
pub enum MatchResult<'a> {
    Full {
        route: &'a Route,
        captures: HashMap<String, CapturedValue>,
    },
    MethodNotAllowed {
        allowed: HashSet<Method>,
    },
    NotFound,
}

/// Ordered sequence of routes plus an optional mounting prefix.
///
/// Routes are evaluated in registration order; the first full match wins.
/// A path match with no method match yields `MethodNotAllowed` with the
/// union of allowed methods across every route whose path matched.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    /// Index from a route's first static path segment to route indices,
    /// used to short-circuit the scan per spec.md §4.2. Routes that start
    /// with a capture are kept in `unindexed` and always scanned.
    by_first_segment: HashMap<String, Vec<usize>>,
    unindexed: Vec<usize>,
    names: HashMap<String, usize>,
    prefix: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("route name '{0}' already registered")]
    DuplicateName(String),
    #[error("no route named '{0}'")]
    UnknownName(String),
    #[error("url_for('{0}'): {1}")]
    UrlFor(String, String),
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount this router under a path prefix; affects subsequently added routes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Register a route for a pattern and a set of methods.
    pub fn add_route(
        &mut self,
        pattern: &str,
        methods: impl IntoIterator<Item = Method>,
        handler: BoxedHandler,
        name: Option<String>,
    ) -> Result<(), RouteError> {
        let full_pattern = format!("{}{}", self.prefix, pattern);
        let compiled = CompiledPattern::compile(&full_pattern)?;
        let methods: HashSet<Method> = methods.into_iter().collect();

        if let Some(ref name) = name {
            if self.names.contains_key(name) {
                return Err(RouteError::DuplicateName(name.clone()));
            }
        }

        let index = self.routes.len();
        match compiled.first_literal_segment() {
            Some(seg) => self
                .by_first_segment
                .entry(seg.to_string())
                .or_default()
                .push(index),
            None => self.unindexed.push(index),
        }
        if let Some(ref name) = name {
            self.names.insert(name.clone(), index);
        }

        self.routes.push(Route {
            pattern: compiled,
            methods,
            handler,
            name,
            error_formatter: None,
        });
        Ok(())
    }

    /// Attach a route-level validation error formatter (spec.md §4.11 precedence: route > router > app).
    pub fn set_route_formatter(
        &mut self,
        index: usize,
        formatter: Arc<dyn crate::validation::ValidationErrorFormatter>,
    ) {
        if let Some(route) = self.routes.get_mut(index) {
            route.error_formatter = Some(formatter);
        }
    }

    /// Match `(method, path)` against the table. Linear scan in registration
    /// order, short-circuited by a first-literal-segment index.
    pub fn match_request(&self, method: &Method, path: &str) -> MatchResult<'_> {
        let first_seg = path.trim_start_matches('/').split('/').next().unwrap_or("");

        let candidate_indices: Box<dyn Iterator<Item = usize>> =
            match self.by_first_segment.get(first_seg) {
                Some(indices) => Box::new(
                    indices
                        .iter()
                        .copied()
                        .chain(self.unindexed.iter().copied())
                        .collect::<std::collections::BTreeSet<_>>()
                        .into_iter(),
                ),
                None => Box::new((0..self.routes.len()).collect::<Vec<_>>().into_iter()),
            };

        let mut allowed = HashSet::new();
        let mut saw_path_match = false;

        // Preserve registration order: re-sort candidate indices ascending
        // (already ascending from BTreeSet / range) so static-vs-capture
        // tie-break is purely "whoever was registered first wins".
        for idx in candidate_indices {
            let route = &self.routes[idx];
            if let Some(captures) = route.pattern.matches(path) {
                saw_path_match = true;
                if route.methods.contains(method) {
                    let captures = captures.into_iter().collect();
                    return MatchResult::Full { route, captures };
                }
                allowed.extend(route.methods.iter().cloned());
            }
        }

        if saw_path_match {
            MatchResult::MethodNotAllowed { allowed }
        } else {
            MatchResult::NotFound
        }
    }

    /// Reverse-generate a URL for a named route.
    pub fn url_for(
        &self,
        name: &str,
        params: &HashMap<String, CapturedValue>,
    ) -> Result<String, RouteError> {
        let idx = self
            .names
            .get(name)
            .ok_or_else(|| RouteError::UnknownName(name.to_string()))?;
        self.routes[*idx]
            .pattern
            .format(params)
            .map_err(|e| RouteError::UrlFor(name.to_string(), e))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Merge another router's routes into this one (used for sub-router inclusion).
    pub fn merge(&mut self, other: Router) {
        for route in other.routes {
            let index = self.routes.len();
            match route.pattern.first_literal_segment() {
                Some(seg) => self
                    .by_first_segment
                    .entry(seg.to_string())
                    .or_default()
                    .push(index),
                None => self.unindexed.push(index),
            }
            if let Some(ref name) = route.name {
                self.names.insert(name.clone(), index);
            }
            self.routes.push(route);
        }
    }
}
