use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Login wire types
// ---------------------------------------------------------------------------

/// Credential exchange request. Accepted as JSON or as an urlencoded form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    #[serde(alias = "username")]
    pub email: String,
    pub password: String,
}

// ---------------------------------------------------------------------------
// Login errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    InvalidCredentials,
    MissingField(String),
    MalformedBody,
    InternalError,
}

impl LoginError {
    pub fn to_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::MalformedBody => "BAD_REQUEST",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn to_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::MissingField(field) => format!("Missing required field: {}", field),
            Self::MalformedBody => "Request body could not be parsed".to_string(),
            Self::InternalError => "An internal error occurred".to_string(),
        }
    }
}

impl LoginData {
    /// Reject blank fields before any hashing work is done.
    pub fn validate(&self) -> Result<(), LoginError> {
        if self.email.trim().is_empty() {
            return Err(LoginError::MissingField("email".to_string()));
        }
        if self.password.is_empty() {
            return Err(LoginError::MissingField("password".to_string()));
        }
        Ok(())
    }
}
