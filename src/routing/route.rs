//! Route descriptors.
//!
//! A [`Route`] pairs one of the four route kinds with a type-erased handler.
//! The variant carries the handler, so tag and handler shape can never
//! disagree.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::{Blob, RequestContext, SseSession, UploadStream};

/// The four supported request/response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Rpc,
    Sse,
    Blob,
    Upload,
}

impl RouteKind {
    /// The only method this kind accepts.
    pub fn method(self) -> Method {
        match self {
            RouteKind::Rpc | RouteKind::Upload => Method::POST,
            RouteKind::Sse | RouteKind::Blob => Method::GET,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RouteKind::Rpc => "rpc",
            RouteKind::Sse => "sse",
            RouteKind::Blob => "blob",
            RouteKind::Upload => "upload",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC handler: returns serialized JSON text, or `None` for an empty body.
pub type RpcHandler<C> =
    Arc<dyn Fn(RequestContext<C>) -> BoxFuture<'static, Result<Option<String>>> + Send + Sync>;

pub type SseHandler<C> = Arc<dyn Fn(SseSession<C>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub type BlobHandler<C> =
    Arc<dyn Fn(RequestContext<C>) -> BoxFuture<'static, Result<Blob>> + Send + Sync>;

pub type UploadHandler<C> =
    Arc<dyn Fn(RequestContext<C>, UploadStream) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A registered route: kind tag plus handler.
pub enum Route<C> {
    Rpc(RpcHandler<C>),
    Sse(SseHandler<C>),
    Blob(BlobHandler<C>),
    Upload(UploadHandler<C>),
}

impl<C: Send + Sync + 'static> Route<C> {
    /// Wrap an RPC handler. `Some(value)` is serialized as JSON; `None` means
    /// no body.
    pub fn rpc<F, Fut, T>(handler: F) -> Self
    where
        F: Fn(RequestContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
        T: Serialize,
    {
        Route::Rpc(Arc::new(move |ctx| {
            let fut = handler(ctx);
            async move {
                let body = match fut.await? {
                    Some(value) => Some(serde_json::to_string(&value)?),
                    None => None,
                };
                Ok::<_, Error>(body)
            }
            .boxed()
        }))
    }

    pub fn sse<F, Fut>(handler: F) -> Self
    where
        F: Fn(SseSession<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Route::Sse(Arc::new(move |session| handler(session).boxed()))
    }

    pub fn blob<F, Fut, B>(handler: F) -> Self
    where
        F: Fn(RequestContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
        B: Into<Blob>,
    {
        Route::Blob(Arc::new(move |ctx| {
            let fut = handler(ctx);
            async move {
                let blob: Blob = fut.await?.into();
                Ok::<_, Error>(blob)
            }
            .boxed()
        }))
    }

    pub fn upload<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestContext<C>, UploadStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Route::Upload(Arc::new(move |ctx, stream| handler(ctx, stream).boxed()))
    }
}

impl<C> Route<C> {
    pub fn kind(&self) -> RouteKind {
        match self {
            Route::Rpc(_) => RouteKind::Rpc,
            Route::Sse(_) => RouteKind::Sse,
            Route::Blob(_) => RouteKind::Blob,
            Route::Upload(_) => RouteKind::Upload,
        }
    }
}

impl<C> Clone for Route<C> {
    fn clone(&self) -> Self {
        match self {
            Route::Rpc(h) => Route::Rpc(Arc::clone(h)),
            Route::Sse(h) => Route::Sse(Arc::clone(h)),
            Route::Blob(h) => Route::Blob(Arc::clone(h)),
            Route::Upload(h) => Route::Upload(Arc::clone(h)),
        }
    }
}

impl<C> fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Route").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_methods() {
        assert_eq!(RouteKind::Rpc.method(), Method::POST);
        assert_eq!(RouteKind::Upload.method(), Method::POST);
        assert_eq!(RouteKind::Sse.method(), Method::GET);
        assert_eq!(RouteKind::Blob.method(), Method::GET);
    }

    #[test]
    fn test_variant_matches_kind() {
        let rpc: Route<()> = Route::rpc(|_ctx| async { Ok(None::<()>) });
        let sse: Route<()> = Route::sse(|_session| async { Ok(()) });
        let blob: Route<()> = Route::blob(|_ctx| async { Ok(Vec::<u8>::new()) });
        let upload: Route<()> = Route::upload(|_ctx, _stream| async { Ok(()) });

        assert_eq!(rpc.kind(), RouteKind::Rpc);
        assert_eq!(sse.kind(), RouteKind::Sse);
        assert_eq!(blob.kind(), RouteKind::Blob);
        assert_eq!(upload.kind(), RouteKind::Upload);
    }
}
