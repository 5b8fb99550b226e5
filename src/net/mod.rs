//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener PEM → tls.rs (RustlsConfig for axum-server)
//!
//! Outbound (one dial per new pooled connection):
//!     upstream URI
//!     → connector.rs (DNS → TCP connect → optional TLS handshake)
//!     → phases fired on the request's ClientTrace
//!     → stream handed to the pooled client
//! ```
//!
//! # Design Decisions
//! - TLS is optional on both sides and handled transparently
//! - IP literal targets never touch the resolver

pub mod connector;
pub mod tls;

pub use connector::{ConnectError, TracingConnector};
