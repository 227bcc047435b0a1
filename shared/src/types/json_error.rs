use serde::{Deserialize, Serialize};

/// Standard error envelope returned by the JSON API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Success envelope; `data` is `null` when there is nothing to return.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub status: String,
    pub data: Option<T>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: Option<T>) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}
