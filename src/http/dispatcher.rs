//! Per-request dispatch.
//!
//! # Data Flow
//! ```text
//! request
//!     → CORS preflight?           → 204
//!     → route lookup (exact)      → 404 NOT_FOUND
//!     → method check (per kind)   → 405 METHOD_NOT_ALLOWED
//!     → Upload: stream → handler  → 200 "OK"
//!     → SSE:    open session      → 200 text/event-stream
//!     → RPC/Blob: read body       → 413 PAYLOAD_TOO_LARGE
//!         → handler               → JSON / empty / raw bytes
//!     any failure                 → Error::into_response
//! ```
//!
//! # Design Decisions
//! - One failure boundary around the whole invocation; panics included
//! - Handler runs only after the body is fully acquired
//! - A disconnect does not interrupt RPC/Blob/Upload handlers; late writes
//!   are lost in the transport

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{coded_response, Error, HandlerPanic, Result};
use crate::http::{body, context::RequestContext, sse, stream::UploadStream};
use crate::observability::metrics;
use crate::routing::{Route, RouteRegistry};

/// State shared by every invocation. Frozen before serving starts.
pub(crate) struct Dispatcher<C> {
    pub(crate) routes: RouteRegistry<C>,
    pub(crate) app: Arc<C>,
    pub(crate) max_request_size: usize,
    pub(crate) cors_enabled: bool,
}

/// The registry key for a request: the raw target, query included.
fn route_key(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

/// Call a handler and await its future, turning a panic in either step into
/// an internal error.
async fn guarded<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> BoxFuture<'static, Result<T>>,
{
    let fut = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(fut) => fut,
        Err(payload) => return Err(Error::internal(HandlerPanic::from_payload(payload))),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::internal(HandlerPanic::from_payload(payload))),
    }
}

/// Axum fallback handler; the only entry point for every request.
pub(crate) async fn dispatch<C>(
    State(dispatcher): State<Arc<Dispatcher<C>>>,
    request: Request<Body>,
) -> Response
where
    C: Send + Sync + 'static,
{
    let start = Instant::now();
    let method = request.method().clone();
    let target = route_key(request.uri()).to_string();

    if dispatcher.cors_enabled && method == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        metrics::record_request("preflight", response.status().as_u16(), start);
        return response;
    }

    let Some(route) = dispatcher.routes.resolve(&target).cloned() else {
        tracing::debug!(method = %method, path = %target, "No route matched");
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16(), start);
        return Error::not_found().into_response();
    };

    let kind = route.kind();
    let response = if method != kind.method() {
        tracing::debug!(method = %method, path = %target, kind = %kind, "Method not allowed");
        Error::method_not_allowed().into_response()
    } else {
        let (parts, body) = request.into_parts();
        let context = RequestContext::new(parts, Arc::clone(&dispatcher.app));
        tracing::debug!(
            request_id = %context.request_id(),
            path = %target,
            kind = %kind,
            "Dispatching request"
        );
        invoke(&dispatcher, route, context, body)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    };

    let status = response.status();
    if status.is_server_error() {
        tracing::warn!(path = %target, kind = %kind, status = status.as_u16(), "Request failed");
    }
    metrics::record_request(kind.as_str(), status.as_u16(), start);
    response
}

async fn invoke<C>(
    dispatcher: &Dispatcher<C>,
    route: Route<C>,
    context: RequestContext<C>,
    body: Body,
) -> Result<Response>
where
    C: Send + Sync + 'static,
{
    match route {
        Route::Upload(handler) => {
            guarded(|| handler(context, UploadStream::new(body))).await?;
            Ok(coded_response(StatusCode::OK, "OK"))
        }
        Route::Sse(handler) => Ok(sse::open(context, handler)),
        Route::Rpc(handler) => {
            let context = acquire(dispatcher, context, body).await?;
            Ok(match guarded(|| handler(context)).await? {
                Some(json) => {
                    let mut response = Response::new(Body::from(json));
                    response.headers_mut().insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                    response
                }
                None => Response::new(Body::empty()),
            })
        }
        Route::Blob(handler) => {
            let context = acquire(dispatcher, context, body).await?;
            let blob = guarded(|| handler(context)).await?;
            Ok(Response::new(blob.into_body()))
        }
    }
}

/// Read the body into the context, enforcing the size budget.
async fn acquire<C>(
    dispatcher: &Dispatcher<C>,
    context: RequestContext<C>,
    body: Body,
) -> Result<RequestContext<C>> {
    if body::declared_over_limit(context.headers(), dispatcher.max_request_size) {
        return Err(Error::payload_too_large());
    }
    let text = body::read_body(body, dispatcher.max_request_size).await?;
    Ok(context.with_body(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsConfig, ServerConfig};
    use crate::http::{Blob, Server};
    use axum::body::Bytes;
    use axum::Router;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct App {
        calls: AtomicUsize,
    }

    fn server() -> Server<App> {
        Server::new(
            ServerConfig::default(),
            App {
                calls: AtomicUsize::new(0),
            },
        )
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Response) {
        let response = router.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_of(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    fn counting_routes() -> (Router, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let (h1, h2, h3, h4) = (hits.clone(), hits.clone(), hits.clone(), hits.clone());
        let router = server()
            .rpc("/rpc", move |_ctx| {
                h1.fetch_add(1, Ordering::SeqCst);
                async { Ok(None::<()>) }
            })
            .upload("/upload", move |_ctx, _stream| {
                h2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .sse("/sse", move |_session| {
                h3.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .blob("/blob", move |_ctx| {
                h4.fetch_add(1, Ordering::SeqCst);
                async { Ok("x") }
            })
            .into_router();
        (router, hits)
    }

    #[tokio::test]
    async fn test_unregistered_path_is_404_for_every_method() {
        let (router, hits) = counting_routes();
        for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS] {
            let request = Request::builder()
                .method(method)
                .uri("/missing")
                .body(Body::empty())
                .unwrap();
            let (status, response) = send(router.clone(), request).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(&body_of(response).await[..], b"\"NOT_FOUND\"");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_without_invoking_handler() {
        let (router, hits) = counting_routes();
        let cases = [
            ("/rpc", Method::GET),
            ("/rpc", Method::PUT),
            ("/upload", Method::GET),
            ("/sse", Method::POST),
            ("/blob", Method::POST),
            ("/blob", Method::DELETE),
        ];
        for (path, method) in cases {
            let request = Request::builder()
                .method(method)
                .uri(path)
                .body(Body::from("payload"))
                .unwrap();
            let (status, response) = send(router.clone(), request).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{path}");
            assert_eq!(&body_of(response).await[..], b"\"METHOD_NOT_ALLOWED\"");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rpc_sees_exact_body() {
        let router = server()
            .rpc("/echo", |ctx: RequestContext<App>| async move {
                ctx.app().calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(ctx.body().unwrap_or_default().to_string()))
            })
            .into_router();

        let raw = "  {\"not\": \"parsed\"}\n";
        let (status, response) = send(router, Request::post("/echo").body(Body::from(raw)).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let value: String = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(value, raw);
    }

    #[tokio::test]
    async fn test_rpc_json_and_empty_replies() {
        let router = server()
            .rpc("/obj", |_ctx| async { Ok(Some(json!({"a": 1}))) })
            .rpc("/none", |_ctx| async { Ok(None::<()>) })
            .into_router();

        let (status, response) = send(router.clone(), Request::post("/obj").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(&body_of(response).await[..], b"{\"a\":1}");

        let (status, response) = send(router, Request::post("/none").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_413_and_handler_skipped() {
        let mut config = ServerConfig::default();
        config.limits.max_request_size = 8;
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let router = Server::new(config, ())
            .rpc("/rpc", move |_ctx| {
                h.fetch_add(1, Ordering::SeqCst);
                async { Ok(None::<()>) }
            })
            .into_router();

        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"12345")),
            Ok(Bytes::from_static(b"6789")),
        ]);
        let request = Request::post("/rpc").body(Body::from_stream(chunks)).unwrap();
        let (status, response) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(&body_of(response).await[..], b"\"PAYLOAD_TOO_LARGE\"");

        let request = Request::post("/rpc").body(Body::from("12345678")).unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typed_failures_map_to_codes() {
        let router = server()
            .rpc("/forbidden", |_ctx| async { Err::<Option<()>, _>(Error::forbidden()) })
            .rpc("/unimplemented", |_ctx| async {
                Err::<Option<()>, _>(Error::not_implemented())
            })
            .rpc("/invalid", |_ctx| async {
                Err::<Option<()>, _>(Error::validation("NAME_TOO_LONG", "name over 64 chars"))
            })
            .rpc("/boom", |_ctx| async {
                Err::<Option<()>, _>(Error::internal("connection string leaked"))
            })
            .into_router();

        let cases = [
            ("/forbidden", StatusCode::FORBIDDEN, "\"FORBIDDEN\""),
            ("/unimplemented", StatusCode::NOT_IMPLEMENTED, "\"NOT_IMPLEMENTED\""),
            ("/invalid", StatusCode::BAD_REQUEST, "\"NAME_TOO_LONG\""),
            ("/boom", StatusCode::INTERNAL_SERVER_ERROR, "\"INTERNAL_ERROR\""),
        ];
        for (path, expected_status, expected_body) in cases {
            let (status, response) = send(router.clone(), Request::post(path).body(Body::empty()).unwrap()).await;
            assert_eq!(status, expected_status, "{path}");
            assert_eq!(body_of(response).await, expected_body.as_bytes(), "{path}");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_internal_error() {
        let router = server()
            .rpc("/panic", |_ctx| async {
                if true {
                    panic!("unexpected state");
                }
                Ok(None::<()>)
            })
            .into_router();

        let (status, response) = send(router, Request::post("/panic").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body_of(response).await[..], b"\"INTERNAL_ERROR\"");
    }

    #[tokio::test]
    async fn test_panic_before_future_is_internal_error() {
        let router = server()
            .rpc("/rpc", |_ctx| {
                if true {
                    panic!("failed before building the future");
                }
                async { Ok(None::<()>) }
            })
            .blob("/blob", |_ctx| {
                if true {
                    panic!("failed before building the future");
                }
                async { Ok("never") }
            })
            .upload("/upload", |_ctx, _stream| {
                if true {
                    panic!("failed before building the future");
                }
                async { Ok(()) }
            })
            .into_router();

        for (method, path) in [(Method::POST, "/rpc"), (Method::GET, "/blob"), (Method::POST, "/upload")] {
            let request = Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap();
            let (status, response) = send(router.clone(), request).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{path}");
            assert_eq!(&body_of(response).await[..], b"\"INTERNAL_ERROR\"", "{path}");
        }
    }

    #[tokio::test]
    async fn test_serialization_failure_is_internal_error() {
        let router = server()
            .rpc("/bad-json", |_ctx| async {
                // Map keys must be strings in JSON.
                let mut map = std::collections::HashMap::new();
                map.insert(vec![1u8], 1);
                Ok(Some(map))
            })
            .into_router();

        let (status, _) = send(router, Request::post("/bad-json").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_upload_sees_chunks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let router = server()
            .upload("/upload", move |ctx, mut stream| {
                let s = s.clone();
                async move {
                    assert!(ctx.body().is_none());
                    while let Some(chunk) = stream.next_chunk().await? {
                        s.lock().unwrap().push(chunk);
                    }
                    Ok::<_, Error>(())
                }
            })
            .into_router();

        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"alpha")),
            Ok(Bytes::from_static(b"beta")),
            Ok(Bytes::from_static(b"gamma")),
        ]);
        let request = Request::post("/upload").body(Body::from_stream(chunks)).unwrap();
        let (status, response) = send(router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body_of(response).await[..], b"\"OK\"");
        assert_eq!(*seen.lock().unwrap(), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_upload_is_not_size_limited() {
        let mut config = ServerConfig::default();
        config.limits.max_request_size = 4;
        let router = Server::new(config, ())
            .upload("/upload", |_ctx, mut stream| async move {
                while stream.next_chunk().await?.is_some() {}
                assert_eq!(stream.bytes_received(), 10);
                Ok::<_, Error>(())
            })
            .into_router();

        let request = Request::post("/upload").body(Body::from("0123456789")).unwrap();
        let (status, _) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_failure_is_mapped() {
        let router = server()
            .upload("/upload", |_ctx, _stream| async { Err(Error::unauthorized()) })
            .into_router();

        let (status, response) = send(router, Request::post("/upload").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(&body_of(response).await[..], b"\"UNAUTHORIZED\"");
    }

    #[tokio::test]
    async fn test_blob_buffer_and_stream() {
        let router = server()
            .blob("/buffer", |_ctx| async { Ok(vec![0u8, 1, 2, 3]) })
            .blob("/stream", |_ctx| async {
                let parts = (0..4).map(|i| Ok::<_, std::io::Error>(vec![b'a' + i; 3]));
                Ok(Blob::stream(futures_util::stream::iter(parts)))
            })
            .into_router();

        let (status, response) = send(router.clone(), Request::get("/buffer").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(&body_of(response).await[..], b"\x00\x01\x02\x03");

        let (status, response) = send(router, Request::get("/stream").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let mut stream = response.into_body().into_data_stream();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"aaabbbcccddd");
    }

    #[tokio::test]
    async fn test_blob_stream_is_pulled_by_the_reader() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let p = pulled.clone();
        let router = server()
            .blob("/big", move |_ctx| {
                let p = p.clone();
                async move {
                    let parts = futures_util::stream::iter(0..100u32).map(move |i| {
                        p.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, std::io::Error>(i.to_be_bytes().to_vec())
                    });
                    Ok(Blob::stream(parts))
                }
            })
            .into_router();

        let (status, response) = send(router, Request::get("/big").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pulled.load(Ordering::SeqCst), 0);

        let mut stream = response.into_body().into_data_stream();
        for expected in 0..3u32 {
            let chunk = stream.next().await.unwrap().unwrap();
            assert_eq!(&chunk[..], &expected.to_be_bytes()[..]);
        }
        assert!(pulled.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_sse_route_streams_events() {
        let router = server()
            .sse("/events", |session| async move {
                session.emit("count", &1)?;
                session.emit("count", &2)?;
                Ok::<_, Error>(())
            })
            .into_router();

        let (status, response) = send(router, Request::get("/events").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(
            &body_of(response).await[..],
            b"event: count\ndata: 1\n\nevent: count\ndata: 2\n\n"
        );
    }

    #[tokio::test]
    async fn test_query_string_is_part_of_the_key() {
        let router = server()
            .rpc("/search?q=1", |_ctx| async { Ok(Some(true)) })
            .into_router();

        let (status, _) = send(router.clone(), Request::post("/search?q=1").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(router, Request::post("/search").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_preflight_and_headers() {
        let mut config = ServerConfig::default();
        config.cors = Some(CorsConfig::new("https://app.example.com"));
        let router = Server::new(config, ())
            .rpc("/rpc", |_ctx| async { Err::<Option<()>, _>(Error::bad_request()) })
            .into_router();

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/anything")
            .body(Body::empty())
            .unwrap();
        let (status, response) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert!(body_of(response).await.is_empty());

        let (status, response) = send(router, Request::post("/rpc").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn test_options_without_cors_goes_through_routing() {
        let router = server().rpc("/rpc", |_ctx| async { Ok(None::<()>) }).into_router();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/rpc")
            .body(Body::empty())
            .unwrap();
        let (status, response) = send(router, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let router = server()
            .rpc("/id", |ctx: RequestContext<App>| async move { Ok(Some(ctx.request_id().to_string())) })
            .into_router();

        let request = Request::post("/id")
            .header("x-request-id", "trace-me")
            .body(Body::empty())
            .unwrap();
        let (_, response) = send(router, request).await;
        assert_eq!(response.headers()["x-request-id"], "trace-me");
        assert_eq!(&body_of(response).await[..], b"\"trace-me\"");
    }
}
