//! Server-Sent Events sessions.
//!
//! # Responsibilities
//! - Send the event-stream headers before the handler runs
//! - Frame and queue events in the order the handler emits them
//! - Run registered cleanups exactly once when the session ends
//!
//! # Data Flow
//! ```text
//! handler ── emit() ──▶ bounded frame queue ──▶ response body stream ──▶ client
//!
//! session end (first of):
//!     handler future completes (Ok, Err or panic)
//!     client disconnect (body stream dropped → channel receiver gone)
//!     → close(): stop accepting frames, end the body, drain cleanups
//! ```
//!
//! # Design Decisions
//! - A disconnect drops the handler future; it is cancelled at its next await
//! - `emit` after close is silently dropped
//! - A client that falls [`SSE_QUEUE_FRAMES`] frames behind loses the newest
//!   frames instead of growing the queue
//! - A panicking cleanup is logged and skipped, the rest still run

use std::convert::Infallible;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue},
    response::Response,
};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::error::{HandlerPanic, Result};
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::routing::route::SseHandler;

/// Frames buffered per session before `emit` starts dropping.
pub const SSE_QUEUE_FRAMES: usize = 256;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered cleanup callbacks, drained at most once.
struct CleanupRegistry {
    state: Mutex<CleanupState>,
}

#[derive(Default)]
struct CleanupState {
    callbacks: Vec<Cleanup>,
    drained: bool,
}

impl CleanupRegistry {
    fn new() -> Self {
        Self {
            state: Mutex::new(CleanupState::default()),
        }
    }

    /// Queue a callback. Once drained, callbacks run on the spot.
    fn push(&self, callback: Cleanup) {
        let mut state = lock(&self.state);
        if state.drained {
            drop(state);
            run_cleanup(0, callback);
        } else {
            state.callbacks.push(callback);
        }
    }

    /// Run queued callbacks in registration order. Only the first call does
    /// anything.
    fn drain(&self) -> usize {
        let callbacks = {
            let mut state = lock(&self.state);
            if state.drained {
                return 0;
            }
            state.drained = true;
            std::mem::take(&mut state.callbacks)
        };

        let count = callbacks.len();
        for (index, callback) in callbacks.into_iter().enumerate() {
            run_cleanup(index, callback);
        }
        count
    }
}

fn run_cleanup(index: usize, callback: Cleanup) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        let reason = HandlerPanic::from_payload(payload);
        tracing::warn!(index, reason = %reason, "SSE cleanup callback failed");
        metrics::record_cleanup_failure();
    }
}

fn encode_frame(event: &str, data: &str) -> Bytes {
    let event: String = event.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

struct Shared<C> {
    context: RequestContext<C>,
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    cleanup: CleanupRegistry,
    closing: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

/// Handle given to SSE handlers.
///
/// Cheap to clone; clones may be moved into spawned tasks and all refer to
/// the same session.
pub struct SseSession<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for SseSession<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> SseSession<C> {
    pub(crate) fn new(context: RequestContext<C>, sender: mpsc::Sender<Bytes>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                context,
                sender: Mutex::new(Some(sender)),
                cleanup: CleanupRegistry::new(),
                closing: AtomicBool::new(false),
                closed_tx,
            }),
        }
    }

    pub fn context(&self) -> &RequestContext<C> {
        &self.shared.context
    }

    pub fn app(&self) -> &C {
        self.shared.context.app()
    }

    /// Send `event: <name>` / `data: <json>` to the client.
    ///
    /// Only a serialization failure is an error. Emitting on a closed
    /// session does nothing, and a frame that finds the queue full is
    /// dropped.
    pub fn emit<T>(&self, event: &str, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let frame = encode_frame(event, &serde_json::to_string(data)?);
        if let Some(tx) = lock(&self.shared.sender).as_ref() {
            match tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        request_id = %self.shared.context.request_id(),
                        event,
                        "SSE client too slow, frame dropped"
                    );
                    metrics::record_dropped_frame();
                }
                // Receiver gone; the disconnect path closes the session.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    /// Register a callback for session end. Runs immediately if the session
    /// has already ended.
    pub fn on_cleanup<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.cleanup.push(Box::new(callback));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Resolves once the session has ended and cleanups have run.
    ///
    /// Meant for tasks spawned off a cloned session. The handler future
    /// itself is dropped on disconnect before this resolves.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// End the session. Returns false if it had already ended.
    pub(crate) fn close(&self) -> bool {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.shared.sender).take();
        let ran = self.shared.cleanup.drain();
        self.shared.closed_tx.send_replace(true);
        metrics::sse_session_closed();
        tracing::debug!(
            request_id = %self.shared.context.request_id(),
            cleanups = ran,
            "SSE session closed"
        );
        true
    }
}

impl<C> fmt::Debug for SseSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseSession")
            .field("request_id", &self.shared.context.request_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the session if the driving task is dropped early.
struct CloseOnDrop<C>(SseSession<C>);

impl<C> Drop for CloseOnDrop<C> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Start an SSE session and return the streaming response.
pub(crate) fn open<C>(context: RequestContext<C>, handler: SseHandler<C>) -> Response
where
    C: Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(SSE_QUEUE_FRAMES);
    let peer = tx.clone();
    let session = SseSession::new(context, tx);

    metrics::sse_session_opened();
    tracing::debug!(request_id = %session.context().request_id(), "SSE session opened");

    tokio::spawn(drive(session, handler, peer));

    let frames = futures_util::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|frame| frame.map(Ok::<_, Infallible>))
    });
    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

async fn drive<C>(session: SseSession<C>, handler: SseHandler<C>, peer: mpsc::Sender<Bytes>)
where
    C: Send + Sync + 'static,
{
    let guard = CloseOnDrop(session.clone());
    let request_id = session.context().request_id().to_string();

    let outcome = match catch_unwind(AssertUnwindSafe(|| handler(session))) {
        Ok(fut) => tokio::select! {
            outcome = AssertUnwindSafe(fut).catch_unwind() => Some(outcome),
            _ = peer.closed() => None,
        },
        Err(payload) => Some(Err(payload)),
    };

    match outcome {
        Some(Ok(Ok(()))) => tracing::debug!(request_id = %request_id, "SSE handler returned"),
        Some(Ok(Err(e))) => tracing::warn!(
            request_id = %request_id,
            code = e.code(),
            error = %e,
            "SSE handler failed after headers were sent"
        ),
        Some(Err(payload)) => tracing::error!(
            request_id = %request_id,
            reason = %HandlerPanic::from_payload(payload),
            "SSE handler panicked"
        ),
        None => tracing::debug!(request_id = %request_id, "SSE client disconnected"),
    }

    drop(peer);
    drop(guard);
}
