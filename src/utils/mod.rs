use hyper::header::{HeaderMap, HeaderName, CONNECTION};
use hyper::Method;

/// Headers that only describe a single transport leg
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Generate a unique correlation ID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Convert a duration to milliseconds
pub fn duration_to_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Check if a request method is eligible for caching
pub fn is_cacheable(method: &Method) -> bool {
    matches!(method, &Method::GET | &Method::HEAD)
}

/// Remove hop-by-hop headers, including any listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}
