//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (axum-server, TraceLayer)
//!     → proxy.rs (CONNECT check, request ID, rewrite, instrumented forward)
//!         → request.rs (RequestId, UpstreamTarget)
//!         → headers.rs (end-to-end header copy)
//!     → upstream response streamed back to the caller
//! ```

pub mod headers;
pub mod proxy;
pub mod request;
pub mod server;

pub use proxy::{proxy_handler, AppState};
pub use request::{RequestId, UpstreamTarget};
pub use server::{build_router, HttpServer, ServerError};
