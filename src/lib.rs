//! HTTP request-lifecycle core.
//!
//! Requests are classified by the route registered at their exact path and
//! handled by one of four protocols: RPC (JSON request/response), SSE
//! (server-pushed events), Blob (raw outbound bytes) and Upload (raw inbound
//! bytes). Failures are mapped to a fixed status and a quoted code string.

pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod routing;

pub use config::ServerConfig;
pub use error::{Error, ErrorKind, Result, ValidationError};
pub use http::{Blob, RequestContext, Server, SseSession, UploadStream};
pub use routing::{Route, RouteKind};
