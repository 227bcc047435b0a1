use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::{Response, StatusCode, header};
use std::convert::Infallible;
use tracing::{debug, error, info, warn};

use crate::handlers::http::utils::headers;
use crate::handlers::http::utils::json_response::deliver_error_json;

#[derive(Debug, Clone, Copy)]
pub enum CacheStrategy {
    Yes,      // Default (1 year)
    No,       // 1 hour cache
    Explicit, // No cache at all
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Yes => write!(f, "Yes (1 year)"),
            CacheStrategy::No => write!(f, "No (1 hour)"),
            CacheStrategy::Explicit => write!(f, "Explicit (no-cache)"),
        }
    }
}

/// Join a request path onto the web root, refusing anything that could climb
/// out of it (`..`, absolute or prefixed components).
pub fn safe_join(web_dir: &str, request_path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::from(web_dir);
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                warn!("Refusing path outside web root: {}", request_path);
                return None;
            }
        }
    }
    Some(out)
}

/// Read an HTML page from disk and deliver it uncached. Pages behind the
/// access guard must never be served from a shared cache.
pub async fn deliver_html_page<P: AsRef<Path>>(
    file_path: P,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_page_with_status(file_path, StatusCode::OK, CacheStrategy::Explicit).await
}

/// Deliver a file with caching headers; a missing file becomes a JSON 404.
pub async fn deliver_page_with_status<P: AsRef<Path>>(
    file_path: P,
    status: StatusCode,
    cache: CacheStrategy,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let path = file_path.as_ref();

    debug!("Reading file from: {} (cache: {})", path.display(), cache);

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("File not found: {}", path.display());
            return deliver_error_json("NOT_FOUND", "Page not found", StatusCode::NOT_FOUND);
        }
        Err(e) => {
            return Err(anyhow!("Failed to read file {}: {}", path.display(), e));
        }
    };

    let mime_type = get_mime_type(path);

    debug!(
        "Delivering page with status: {}, size: {} bytes, mime: {}",
        status,
        content.len(),
        mime_type
    );

    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime_type)
        .body(full(content))
        .map_err(|e| anyhow!("Failed to build response: {}", e))?;

    Ok(match cache {
        CacheStrategy::Yes => headers::add_cache_headers_with_max_age(response, None),
        CacheStrategy::No => headers::add_cache_headers_with_max_age(response, Some(3600)),
        CacheStrategy::Explicit => headers::add_no_cache_headers(response),
    })
}

fn get_mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|s| s.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("csv") => "text/csv; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff2") => "font/woff2",
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        _ => "application/octet-stream",
    }
}

/// `303 See Other`; used after form posts so the browser follows with a GET.
pub fn deliver_redirect(location: &str) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    info!("Delivering redirect to: {}", location);

    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location)
        .header(header::CACHE_CONTROL, "no-store")
        .body(empty())
        .map_err(|e: http::Error| {
            error!("Failed to build redirect response to {}: {}", location, e);
            anyhow!("Failed to build redirect response: {}", e)
        })
}

/// Helper function to create an empty body
pub fn empty() -> BoxBody<Bytes, Infallible> {
    Empty::<Bytes>::new().boxed()
}

/// Helper function to create a full body from various types
pub fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, Infallible> {
    Full::new(chunk.into()).boxed()
}
