//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, listen)
//!     → request.rs (request ID)
//!     → cors.rs (Access-Control-* headers on every response)
//!     → dispatcher.rs (route lookup, method check, failure boundary)
//!         → body.rs (buffered body for RPC/Blob)
//!         → stream.rs (raw passthrough for Upload/Blob streams)
//!         → sse.rs (event-stream session)
//!     → Send to client
//! ```

pub mod body;
pub mod context;
pub mod cors;
pub(crate) mod dispatcher;
pub mod request;
pub mod server;
pub mod sse;
pub mod stream;

pub use context::RequestContext;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::Server;
pub use sse::SseSession;
pub use stream::{Blob, UploadStream};
