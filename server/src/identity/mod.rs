//! Identity provider seam.
//!
//! The access guard and the auth handlers only talk to [`IdentityProvider`].
//! [`JwtIdentityProvider`] is the in-process implementation: HS256 access
//! tokens, single-use rotating refresh tokens, argon2 credentials from the
//! configured user directory.

pub mod jwt;
pub mod password;

pub use self::jwt::JwtIdentityProvider;

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use shared::types::Session;
use thiserror::Error;

use crate::cookies::CookieTransaction;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("password hash error: {0}")]
    PasswordHash(String),

    #[error("credential check aborted: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Resolves, creates and destroys sessions, reading and writing auth cookies
/// through the request's [`CookieTransaction`].
///
/// Implementations must be shareable across connection tasks.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Reconstruct the session from the request cookies, refreshing tokens
    /// when the access token has lapsed. `Ok(None)` means anonymous.
    fn resolve(
        &self,
        cookies: &mut CookieTransaction,
    ) -> impl Future<Output = Result<Option<Session>, IdentityError>> + Send;

    /// Exchange credentials for a new session and write its cookies.
    fn sign_in(
        &self,
        email: &str,
        password: &str,
        cookies: &mut CookieTransaction,
    ) -> impl Future<Output = Result<Session, IdentityError>> + Send;

    /// Invalidate the current session and clear its cookies.
    fn sign_out(
        &self,
        cookies: &mut CookieTransaction,
    ) -> impl Future<Output = Result<(), IdentityError>> + Send;
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
