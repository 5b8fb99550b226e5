//! Request identification and rewriting.
//!
//! # Responsibilities
//! - Generate the per-request correlation ID
//! - Rewrite inbound URIs onto the fixed upstream target
//!
//! # Design Decisions
//! - IDs are 6 random bytes, hex encoded; correlation only, never security
//! - The random source is injected so tests can pin IDs
//! - Path and query are forwarded untouched; any path on the target is ignored

use std::fmt;
use std::str::FromStr;

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::Uri;
use rand::rngs::OsRng;
use rand::RngCore;
use url::Url;

/// A source of random bytes for request IDs.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

/// Operating system randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// Correlation ID attached to every access record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Number of random bytes behind each ID.
    pub const BYTES: usize = 6;

    /// Generate a fresh ID.
    ///
    /// # Panics
    ///
    /// Panics if the random source fails; the proxy cannot run without one.
    pub fn generate(source: &dyn RandomSource) -> Self {
        let mut bytes = [0u8; Self::BYTES];
        if let Err(err) = source.fill_bytes(&mut bytes) {
            panic!("random source failed while generating request id: {err}");
        }
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error type for parsing the upstream target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("empty target url")]
    Empty,
    #[error("invalid target url {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported target scheme {0:?} (expected http or https)")]
    Scheme(String),
    #[error("target url {0:?} has no host")]
    MissingHost(String),
    #[error("invalid target authority {0:?}")]
    Authority(String),
}

/// The single upstream every request is forwarded to.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    scheme: Scheme,
    authority: Authority,
}

impl UpstreamTarget {
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Point `uri` at the upstream, keeping its path and query.
    pub fn rewrite(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        Ok(Uri::from_parts(parts)?)
    }
}

impl FromStr for UpstreamTarget {
    type Err = TargetError;

    fn from_str(target: &str) -> Result<Self, Self::Err> {
        if target.trim().is_empty() {
            return Err(TargetError::Empty);
        }
        let url = Url::parse(target).map_err(|source| TargetError::Parse {
            url: target.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(TargetError::Scheme(other.to_string())),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TargetError::MissingHost(target.to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority =
            Authority::from_str(&authority).map_err(|_| TargetError::Authority(authority))?;

        Ok(Self { scheme, authority })
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}
