//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before listen):
//!     rpc / sse / blob / upload
//!     → route.rs (erase handler into a kind-tagged Route)
//!     → router.rs (store under the exact path, last write wins)
//!
//! Incoming Request (raw request target)
//!     → router.rs (exact string lookup)
//!     → Return: Route or None
//! ```
//!
//! # Design Decisions
//! - Routes are frozen once the server starts serving (shared via Arc, no locks)
//! - Exact match only: no normalization, no wildcards, no parameters
//! - Method is not a routing dimension; each kind checks it at dispatch

pub mod route;
pub mod router;

pub use route::{Route, RouteKind};
pub use router::RouteRegistry;
