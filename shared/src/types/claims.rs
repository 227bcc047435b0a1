use serde::{Deserialize, Serialize};

/// Claims embedded in every access token issued by the gateway.
///
/// The token is an HS256 JWT carried in the access cookie. Verifying the
/// signature and `exp` is all the access guard needs: role and sites travel
/// with the token, so no directory lookup happens on the hot path. Claims go
/// stale at most one access-token lifetime after an admin edits a user; the
/// refresh rotation re-reads the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Standard JWT subject (the user id).
    pub sub: String,

    #[serde(default)]
    pub email: String,

    /// Raw role string from the user's metadata.
    #[serde(default)]
    pub role: String,

    /// Authorized site ids. Kept as raw JSON so a malformed value degrades to
    /// an empty site set instead of failing token verification.
    #[serde(default)]
    pub sites: serde_json::Value,

    /// Session id shared by the access/refresh pair.
    pub sid: String,

    /// Issued-at (Unix timestamp, seconds).
    pub iat: i64,

    /// Standard JWT expiry (Unix timestamp, seconds).
    pub exp: i64,
}
