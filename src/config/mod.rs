//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → cli.rs (command-line overrides: port, target, ssl)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → read by the server at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the upstream never changes at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, ConfigError};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, TimeoutConfig, TlsConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
