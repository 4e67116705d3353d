use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Hop-by-hop headers stripped before forwarding, per RFC 7230 §6.1.
pub(crate) const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Best-effort client identity for rate limiting: the first
/// `X-Forwarded-For` hop when a prior proxy supplied one, otherwise the
/// peer address of the connection.
///
/// This is NOT the value to append to an outbound `X-Forwarded-For` chain;
/// that must be the immediate peer ([`peer_ip`]), or the original client
/// gets recorded twice.
pub(crate) fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }

    peer_ip(req)
}

/// The address of whoever opened the connection to this hop, regardless of
/// any forwarding headers they sent.
pub(crate) fn peer_ip(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "unknown".to_owned()
}

/// Extend an existing `X-Forwarded-For` chain with this hop's peer.
pub(crate) fn forwarded_for_chain(prior: Option<&str>, peer_ip: &str) -> String {
    match prior {
        Some(prior) if !prior.is_empty() => format!("{prior}, {peer_ip}"),
        _ => peer_ip.to_owned(),
    }
}
