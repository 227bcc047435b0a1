use hyper::header::{HeaderMap, HeaderValue};
use tracing::debug;

/// Extract a header value as a string
pub fn get_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether a header's media type (parameters ignored) equals `media_type`.
pub fn media_type_is(headers: &HeaderMap, name: &str, media_type: &str) -> bool {
    get_header_value(headers, name)
        .and_then(|v| v.split(';').next().map(|m| m.trim().to_string()))
        .map(|m| m.eq_ignore_ascii_case(media_type))
        .unwrap_or(false)
}

/// Check if the request accepts a specific content type
pub fn accepts_content_type(headers: &HeaderMap, content_type: &str) -> bool {
    get_header_value(headers, "accept")
        .map(|accept| accept.contains(content_type))
        .unwrap_or(false)
}

/// Add no-cache headers for non-static files
pub fn add_no_cache_headers<T>(mut res: hyper::Response<T>) -> hyper::Response<T> {
    let headers = res.headers_mut();

    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert("pragma", HeaderValue::from_static("no-cache"));
    headers.insert("expires", HeaderValue::from_static("0"));
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );

    debug!("Added no-cache headers");
    res
}

/// Add custom cache headers with specified max-age
pub fn add_cache_headers_with_max_age<T>(
    mut res: hyper::Response<T>,
    max_age_seconds: Option<u64>,
) -> hyper::Response<T> {
    let headers = res.headers_mut();
    let time = max_age_seconds.unwrap_or(31536000);

    let cache_control = format!("public, max-age={}", time);
    headers.insert(
        "cache-control",
        HeaderValue::from_str(&cache_control)
            .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=3600")),
    );
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );

    debug!("Added cache headers with max-age: {} seconds", time);
    res
}
