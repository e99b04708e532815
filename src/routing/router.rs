//! Route lookup.
//!
//! # Responsibilities
//! - Store routes keyed by their exact path string
//! - Look up the route for a raw request target
//! - Return the matched route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after the server starts (thread-safe without locks)
//! - O(1) lookup via HashMap
//! - Duplicate registration replaces the earlier route and logs a warning

use std::collections::HashMap;

use crate::routing::route::Route;

/// Path → route table.
pub struct RouteRegistry<C> {
    routes: HashMap<String, Route<C>>,
}

impl<C> RouteRegistry<C> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Store `route` under `path`, returning the route it replaced.
    pub fn register(&mut self, path: impl Into<String>, route: Route<C>) -> Option<Route<C>> {
        let path = path.into();
        let kind = route.kind();
        let previous = self.routes.insert(path.clone(), route);
        match &previous {
            Some(old) => tracing::warn!(
                path = %path,
                kind = %kind,
                replaced = %old.kind(),
                "Route re-registered, last registration wins"
            ),
            None => tracing::debug!(path = %path, kind = %kind, "Route registered"),
        }
        previous
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, path: &str) -> Option<&Route<C>> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<C> Default for RouteRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteKind;

    fn rpc() -> Route<()> {
        Route::rpc(|_ctx| async { Ok(None::<()>) })
    }

    #[test]
    fn test_exact_match_only() {
        let mut registry = RouteRegistry::new();
        registry.register("/echo", rpc());

        assert!(registry.resolve("/echo").is_some());
        assert!(registry.resolve("/echo/").is_none());
        assert!(registry.resolve("/ECHO").is_none());
        assert!(registry.resolve("/echo?x=1").is_none());
        assert!(registry.resolve("/").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = RouteRegistry::new();
        assert!(registry.register("/thing", rpc()).is_none());

        let replaced = registry.register("/thing", Route::sse(|_s| async { Ok(()) }));
        assert_eq!(replaced.map(|r| r.kind()), Some(RouteKind::Rpc));
        assert_eq!(registry.resolve("/thing").map(|r| r.kind()), Some(RouteKind::Sse));
        assert_eq!(registry.len(), 1);
    }
}
