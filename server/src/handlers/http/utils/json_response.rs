use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Response, StatusCode, header};
use serde::Serialize;
use shared::types::{ErrorResponse, SuccessResponse};
use std::convert::Infallible;
use tracing::{debug, error};

use crate::handlers::http::utils::deliver_page::full;

/// Serialize any `Serialize` type and deliver it as a JSON response.
pub fn deliver_serialized_json<T: Serialize>(
    data: &T,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let json = serde_json::to_string(data).context("Failed to serialize response")?;

    debug!("Delivering serialized JSON response, size: {} bytes", json.len());

    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-store")
        .body(full(json))
        .map_err(|e| anyhow!("Failed to build JSON response: {}", e))?;

    Ok(response)
}

/// `{"status":"success","data":...}` with `200 OK`.
pub fn deliver_success_json<T: Serialize>(
    data: Option<T>,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    deliver_serialized_json(&SuccessResponse::new(data), StatusCode::OK)
}

/// Delivers a JSON error response with the specified error code, message, and status.
pub fn deliver_error_json(
    error_code: &str,
    message: &str,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    if status.is_server_error() {
        error!(
            "Delivering error JSON: {} - {} ({})",
            status.as_u16(),
            error_code,
            message
        );
    } else {
        debug!(
            "Delivering error JSON: {} - {} ({})",
            status.as_u16(),
            error_code,
            message
        );
    }

    deliver_serialized_json(&ErrorResponse::new(error_code, message), status)
}
