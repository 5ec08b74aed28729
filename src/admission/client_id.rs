//! Client identity resolution from request headers.

use axum::http::HeaderMap;

/// Identifier used when no client address header is usable.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client IP header set by the edge proxy (Cloudflare).
pub const EDGE_CLIENT_IP_HEADER: &str = "cf-connecting-ip";
/// Client IP header set by a reverse proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Comma-separated proxy chain; the first entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Derive a stable identifier for the caller.
///
/// Precedence is the edge proxy header, then `x-real-ip`, then the first
/// address in `x-forwarded-for`. Headers that are empty or not valid text are
/// skipped. Never fails: falls back to [`UNKNOWN_CLIENT`].
pub fn resolve_client_id(headers: &HeaderMap) -> String {
    header_value(headers, EDGE_CLIENT_IP_HEADER)
        .or_else(|| header_value(headers, REAL_IP_HEADER))
        .or_else(|| {
            header_value(headers, FORWARDED_FOR_HEADER)
                .and_then(|list| list.split(',').next().map(str::trim))
                .filter(|first| !first.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
