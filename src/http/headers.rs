//! Header handling between the caller and the upstream.
//!
//! Headers are forwarded as-is in both directions except hop-by-hop headers
//! (RFC 7230 §6.1), which describe a single connection and are regenerated by
//! each side's transport.

use axum::http::header::{self, HeaderMap, HeaderName};

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether `name` is hop-by-hop, either by definition or because the message's
/// `Connection` header lists it.
fn is_hop_by_hop(name: &HeaderName, connection_listed: &[HeaderName]) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || connection_listed.contains(name)
}

fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Append every end-to-end header of `from` onto `to`.
///
/// Multi-valued headers keep all their values, in order.
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    let listed = connection_listed(from);
    for (name, value) in from {
        if !is_hop_by_hop(name, &listed) {
            to.append(name.clone(), value.clone());
        }
    }
}
