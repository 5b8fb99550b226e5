//! The proxy request handler.
//!
//! # Responsibilities
//! - Reject CONNECT
//! - Rewrite every other request onto the upstream target and forward it
//! - Meter both bodies and record transport phases
//! - Emit exactly one access record per forwarded request
//!
//! # Design Decisions
//! - No retries and no redirects: the upstream's answer is the caller's answer
//! - Upstream failures become 502 with the error text as the body
//! - The record for a successful call is emitted when the response body
//!   finishes streaming, from whichever task drives that body

use std::error::Error as StdError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::capture_connection;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::ProxyConfig;
use crate::http::headers::copy_headers;
use crate::http::request::{OsRandom, RandomSource, RequestId, UpstreamTarget};
use crate::http::server::ServerError;
use crate::instrument::{ClientTrace, InstrumentedStream, Phase, PhaseTimer, StreamMeter};
use crate::net::connector::TracingConnector;
use crate::net::tls::upstream_client_config;
use crate::observability::{ObservabilityRecord, RecordSink, RequestMetrics, ResponseMetrics};

/// Request body type sent upstream.
pub type UpstreamBody = InstrumentedStream<Body>;

/// Pooled client used for every outbound call.
pub type UpstreamClient = Client<TracingConnector, UpstreamBody>;

/// Application state injected into the handler.
///
/// Everything here is read-only after startup; the client pools internally.
#[derive(Clone)]
pub struct AppState {
    upstream: Arc<UpstreamTarget>,
    preserve_host: bool,
    client: UpstreamClient,
    random: Arc<dyn RandomSource>,
    sink: Arc<dyn RecordSink>,
}

impl AppState {
    /// Build the upstream client and state from validated configuration.
    pub fn new(config: &ProxyConfig, sink: Arc<dyn RecordSink>) -> Result<Self, ServerError> {
        let upstream: UpstreamTarget = config.upstream.target.parse()?;
        let tls = upstream_client_config(config.upstream.ca_file.as_deref().map(Path::new))?;
        let connector =
            TracingConnector::new(tls, Duration::from_secs(config.timeouts.connect_secs));

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
            .pool_max_idle_per_host(config.upstream.max_idle_connections)
            .build(connector);

        Ok(Self {
            upstream: Arc::new(upstream),
            preserve_host: config.upstream.preserve_host,
            client,
            random: Arc::new(OsRandom),
            sink,
        })
    }

    /// Replace the source of request ID bytes.
    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn upstream(&self) -> &UpstreamTarget {
        &self.upstream
    }
}

/// What the handler knows about one forwarded request until its record is emitted.
struct RequestContext {
    id: RequestId,
    arrived_at: SystemTime,
    method: Method,
    url: String,
    request_body: StreamMeter,
    timer: PhaseTimer,
    sink: Arc<dyn RecordSink>,
}

impl RequestContext {
    fn emit(self, resp: Option<ResponseMetrics>, error: Option<String>) {
        let record = ObservabilityRecord {
            id: self.id.to_string(),
            req: RequestMetrics::new(self.arrived_at, &self.method, self.url, &self.request_body),
            latency: self.timer.entries(),
            resp,
            error,
        };
        self.sink.emit(record);
    }

    fn bad_gateway(self, message: String) -> Response {
        tracing::warn!(id = %self.id, url = %self.url, error = %message, "Upstream request failed");
        self.timer.record(Phase::WroteResponse);
        self.emit(None, Some(message.clone()));
        (StatusCode::BAD_GATEWAY, message).into_response()
    }
}

/// Forward one request to the upstream.
pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if request.method() == Method::CONNECT {
        tracing::debug!(uri = %request.uri(), "Rejected CONNECT request");
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let id = RequestId::generate(state.random.as_ref());
    let timer = PhaseTimer::new(Instant::now());
    let arrived_at = SystemTime::now();
    let trace = ClientTrace::recording(timer.clone());

    let (parts, body) = request.into_parts();
    let request_body = StreamMeter::new();
    let mut ctx = RequestContext {
        id,
        arrived_at,
        method: parts.method.clone(),
        url: parts.uri.to_string(),
        request_body: request_body.clone(),
        timer,
        sink: state.sink.clone(),
    };

    let uri = match state.upstream.rewrite(&parts.uri) {
        Ok(uri) => uri,
        Err(err) => return ctx.bad_gateway(error_text(&err)),
    };
    ctx.url = uri.to_string();

    tracing::debug!(id = %ctx.id, method = %parts.method, url = %ctx.url, "Proxying request");

    // A fresh request carries none of the inbound request-line state
    // (version, extensions), only method, target and end-to-end headers.
    let body = InstrumentedStream::new(body, request_body).with_trace(trace.clone());
    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = uri;
    *outbound.version_mut() = Version::HTTP_11;
    copy_headers(&parts.headers, outbound.headers_mut());
    if !state.preserve_host {
        outbound.headers_mut().remove(header::HOST);
    }

    let mut connection = capture_connection(&mut outbound);
    trace.fire(Phase::GetConn);
    let mut call = std::pin::pin!(trace.clone().scope(state.client.request(outbound)));

    let result = tokio::select! {
        biased;
        connected = async { connection.wait_for_connection_metadata().await.is_some() } => {
            if connected {
                trace.fire(Phase::GotConn);
            }
            call.await
        }
        result = &mut call => {
            // Finished before the wait above was polled again. The body
            // hook has usually recorded `got_conn` already.
            if connection.connection_metadata().is_some() {
                trace.fire(Phase::GotConn);
            }
            result
        }
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => return ctx.bad_gateway(error_text(&err)),
    };
    trace.fire(Phase::FirstResponseByte);

    let (upstream_parts, body) = response.into_parts();
    let status = upstream_parts.status;
    tracing::debug!(id = %ctx.id, status = %status, "Upstream responded");

    let response_body = StreamMeter::new();
    let meter = response_body.clone();
    let body = InstrumentedStream::new(body, response_body).on_finish(move |outcome| {
        ctx.timer.record(Phase::WroteResponse);
        let error = outcome.into_error();
        if let Some(error) = &error {
            tracing::warn!(id = %ctx.id, error = %error, "Response body copy failed");
        }
        ctx.emit(Some(ResponseMetrics::new(status, &meter)), error);
    });

    let mut response = Response::new(Body::new(body));
    *response.status_mut() = status;
    copy_headers(&upstream_parts.headers, response.headers_mut());
    response
}

/// Render `err` and its sources as one line, skipping sources whose text
/// is already included by the error that wraps them.
pub fn error_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let part = cause.to_string();
        if !text.contains(&part) {
            text.push_str(": ");
            text.push_str(&part);
        }
        source = cause.source();
    }
    text
}
