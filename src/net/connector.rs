//! Upstream connector that reports dial phases.
//!
//! # Responsibilities
//! - Resolve, connect and (for `https`) handshake with the upstream
//! - Fire `dns_*`, `conn_*` and `tls_*` phases on the request's [`ClientTrace`]
//! - Bound the dial with the configured connect timeout
//!
//! The pooled client only calls the connector when no idle connection is
//! available, so requests that reuse a connection record none of these phases.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::instrument::trace::{self, ClientTrace};
use crate::instrument::Phase;

/// Error type for dialling the upstream.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("missing host in upstream uri {0}")]
    MissingHost(Uri),
    #[error("unsupported upstream scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("lookup {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("lookup {0}: no addresses found")]
    NoAddresses(String),
    #[error("dial tcp {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("dial tcp {host}:{port}: i/o timeout after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },
    #[error("invalid tls server name {0:?}")]
    ServerName(String),
    #[error("tls handshake with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },
}

/// A [`tower::Service`] from upstream URI to a connected stream.
#[derive(Clone)]
pub struct TracingConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl TracingConnector {
    pub fn new(tls: Arc<ClientConfig>, connect_timeout: Duration) -> Self {
        Self {
            tls: TlsConnector::from(tls),
            connect_timeout,
        }
    }

    async fn connect(self, dst: Uri, trace: Option<ClientTrace>) -> Result<UpstreamStream, ConnectError> {
        let trace = trace.as_ref();
        let secure = match dst.scheme_str() {
            None | Some("http") => false,
            Some("https") => true,
            Some(other) => return Err(ConnectError::UnsupportedScheme(other.to_string())),
        };
        let host = dst
            .host()
            .ok_or_else(|| ConnectError::MissingHost(dst.clone()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = dst.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let addrs = resolve(&host, port, trace).await?;

        trace::fire(trace, Phase::ConnectStart);
        let dialled = tokio::time::timeout(self.connect_timeout, connect_any(&addrs)).await;
        trace::fire(trace, Phase::ConnectDone);
        let tcp = dialled.map_err(|_| ConnectError::Timeout {
            host: host.clone(),
            port,
            timeout: self.connect_timeout,
        })??;
        let _ = tcp.set_nodelay(true);

        tracing::debug!(host = %host, port, peer = ?tcp.peer_addr().ok(), secure, "Dialled upstream");

        if !secure {
            return Ok(UpstreamStream::Plain(TokioIo::new(tcp)));
        }

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| ConnectError::ServerName(host.clone()))?;
        trace::fire(trace, Phase::TlsHandshakeStart);
        let handshake = self.tls.connect(server_name, tcp).await;
        trace::fire(trace, Phase::TlsHandshakeDone);
        let stream = handshake.map_err(|source| ConnectError::Tls { host, source })?;

        Ok(UpstreamStream::Tls(Box::new(TokioIo::new(stream))))
    }
}

impl tower::Service<Uri> for TracingConnector {
    type Response = UpstreamStream;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<UpstreamStream, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        // The client invokes the connector while polling the outbound call,
        // which is inside the request's trace scope.
        let trace = ClientTrace::current();
        Box::pin(self.clone().connect(dst, trace))
    }
}

/// Resolve `host`, skipping the lookup (and its phases) for IP literals.
async fn resolve(host: &str, port: u16, trace: Option<&ClientTrace>) -> Result<Vec<SocketAddr>, ConnectError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    trace::fire(trace, Phase::DnsStart);
    let looked_up = tokio::net::lookup_host((host, port)).await;
    trace::fire(trace, Phase::DnsDone);

    let addrs: Vec<SocketAddr> = looked_up
        .map_err(|source| ConnectError::Dns {
            host: host.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::NoAddresses(host.to_string()));
    }
    Ok(addrs)
}

/// Connect to the first address that accepts.
async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, ConnectError> {
    let mut last_err = None;
    for &addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) => {
                tracing::trace!(addr = %addr, error = %source, "Upstream address refused");
                last_err = Some(ConnectError::Connect { addr, source });
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ConnectError::NoAddresses(String::new())))
}

/// A connected upstream stream, plain or TLS.
pub enum UpstreamStream {
    Plain(TokioIo<TcpStream>),
    Tls(Box<TokioIo<TlsStream<TcpStream>>>),
}

impl Connection for UpstreamStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(io) => Pin::new(io).poll_read(cx, buf),
            UpstreamStream::Tls(io) => Pin::new(io.as_mut()).poll_read(cx, buf),
        }
    }
}

impl Write for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(io) => Pin::new(io).poll_write(cx, buf),
            UpstreamStream::Tls(io) => Pin::new(io.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(io) => Pin::new(io).poll_flush(cx),
            UpstreamStream::Tls(io) => Pin::new(io.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(io) => Pin::new(io).poll_shutdown(cx),
            UpstreamStream::Tls(io) => Pin::new(io.as_mut()).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            UpstreamStream::Plain(io) => io.is_write_vectored(),
            UpstreamStream::Tls(io) => io.is_write_vectored(),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(io) => Pin::new(io).poll_write_vectored(cx, bufs),
            UpstreamStream::Tls(io) => Pin::new(io.as_mut()).poll_write_vectored(cx, bufs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tower::ServiceExt;

    use crate::instrument::PhaseTimer;
    use crate::net::tls::upstream_client_config;

    fn connector() -> TracingConnector {
        TracingConnector::new(upstream_client_config(None).unwrap(), Duration::from_secs(2))
    }

    fn phases(timer: &PhaseTimer) -> Vec<Phase> {
        timer.entries().iter().map(|e| e.phase).collect()
    }

    #[tokio::test]
    async fn dial_by_name_records_dns_and_connect_phases() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { while listener.accept().await.is_ok() {} });

        let timer = PhaseTimer::new(Instant::now());
        let uri: Uri = format!("http://localhost:{port}/").parse().unwrap();
        let stream = ClientTrace::recording(timer.clone())
            .scope(connector().oneshot(uri))
            .await
            .unwrap();

        assert!(matches!(stream, UpstreamStream::Plain(_)));
        assert_eq!(
            phases(&timer),
            vec![Phase::DnsStart, Phase::DnsDone, Phase::ConnectStart, Phase::ConnectDone]
        );
    }

    #[tokio::test]
    async fn ip_literal_skips_dns_phases() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { while listener.accept().await.is_ok() {} });

        let timer = PhaseTimer::new(Instant::now());
        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        ClientTrace::recording(timer.clone())
            .scope(connector().oneshot(uri))
            .await
            .unwrap();

        assert_eq!(phases(&timer), vec![Phase::ConnectStart, Phase::ConnectDone]);
    }

    #[tokio::test]
    async fn refused_connection_still_records_connect_done() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let timer = PhaseTimer::new(Instant::now());
        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        let err = ClientTrace::recording(timer.clone())
            .scope(connector().oneshot(uri))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectError::Connect { .. }));
        assert!(err.to_string().contains(&addr.to_string()));
        assert_eq!(phases(&timer), vec![Phase::ConnectStart, Phase::ConnectDone]);
    }

    #[tokio::test]
    async fn dial_without_trace_scope_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { while listener.accept().await.is_ok() {} });

        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        assert!(connector().oneshot(uri).await.is_ok());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let uri: Uri = "ftp://127.0.0.1:21/".parse().unwrap();
        let err = connector().oneshot(uri).await.err().unwrap();
        assert!(matches!(err, ConnectError::UnsupportedScheme(s) if s == "ftp"));
    }
}
