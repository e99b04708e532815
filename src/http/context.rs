//! Per-request context handed to handlers.

use std::fmt;
use std::sync::Arc;

use axum::http::{request::Parts, HeaderMap, Method, Uri};

use crate::http::request::RequestIdExt;

/// Everything a handler may read about one request.
///
/// Built once per connection by the dispatcher and moved into the handler.
/// The application context is shared read-only across all requests; the
/// core does no locking around it.
pub struct RequestContext<C> {
    request_id: String,
    parts: Parts,
    body: Option<String>,
    app: Arc<C>,
}

impl<C> RequestContext<C> {
    pub(crate) fn new(parts: Parts, app: Arc<C>) -> Self {
        let request_id = parts.headers.request_id();
        Self {
            request_id,
            parts,
            body: None,
            app,
        }
    }

    pub(crate) fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of `x-request-id` for this request.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// A header as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The buffered body. `Some` for RPC and Blob routes, `None` otherwise.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Take ownership of the buffered body.
    pub fn take_body(&mut self) -> Option<String> {
        self.body.take()
    }

    /// The shared application context.
    pub fn app(&self) -> &C {
        &self.app
    }

    /// Another handle on the shared application context, for spawned tasks.
    pub fn app_handle(&self) -> Arc<C> {
        Arc::clone(&self.app)
    }
}

impl<C> fmt::Debug for RequestContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("body_len", &self.body.as_ref().map(String::len))
            .finish_non_exhaustive()
    }
}
