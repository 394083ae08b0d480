//! Hop-by-hop header filtering (RFC 7230).

use http::header::HeaderName;
use http::HeaderMap;

/// Headers that govern a single transport hop and must not be forwarded,
/// on either leg.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header is hop-by-hop. `HeaderName` is already lowercase.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy all end-to-end headers, preserving multi-value order verbatim.
pub fn copy_end_to_end(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if !is_hop_by_hop(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}

/// Copy request headers for the upstream leg.
///
/// Same as [`copy_end_to_end`] except `host`: the upstream host header is
/// derived from the target URL by the client, never forwarded from the
/// client-facing leg.
pub fn copy_request_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if !is_hop_by_hop(name) && name != http::header::HOST {
            dst.append(name.clone(), value.clone());
        }
    }
}
