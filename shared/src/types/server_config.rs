use serde::Deserialize;
use thiserror::Error;

use crate::types::session::Role;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub web_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: u64,
    #[serde(default = "default_refresh_token_hours")]
    pub refresh_token_hours: u64,
    /// Upper bound on session resolution per request. A provider that does
    /// not answer in time is treated as "no session".
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_access_cookie")]
    pub access_cookie: String,
    #[serde(default = "default_refresh_cookie")]
    pub refresh_cookie: String,
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
    /// HMAC key used to sign and verify access tokens.
    ///
    /// Prefer loading this via the `JWT_SECRET` environment variable.  This
    /// config field is the fallback for deployments that cannot inject env
    /// vars at runtime.
    ///
    /// **Minimum length:** 32 characters.
    /// **Hot-reload safe:** NO — read once at startup. Rotating it
    /// invalidates every outstanding access token.
    pub jwt_secret: Option<String>,
}

/// Route table for the access guard.
#[derive(Debug, Deserialize, Clone)]
pub struct RoutesConfig {
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
    #[serde(default = "default_client_prefix")]
    pub client_prefix: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Ordered patterns that bypass the guard entirely.
    #[serde(default = "default_exclusions")]
    pub exclude: Vec<String>,
}

/// One account in the user directory.
#[derive(Debug, Deserialize, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: String,
    #[serde(default)]
    pub sites: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Full bind address, e.g. `"127.0.0.1:3000"`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl AuthConfig {
    pub fn access_token_secs(&self) -> u64 {
        self.access_token_minutes * 60
    }

    pub fn refresh_token_secs(&self) -> u64 {
        self.refresh_token_hours * 3600
    }

    /// Resolve the JWT secret with `JWT_SECRET` env-var taking priority over
    /// the config file field.
    ///
    /// Returns `None` when neither source is set (the server startup code
    /// treats this as a hard error).
    pub fn resolved_jwt_secret(&self) -> Option<String> {
        std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.jwt_secret.clone())
            .filter(|s| !s.is_empty())
    }
}

impl UserRecord {
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

impl AppConfig {
    /// Directory lookup by email, case-insensitive.
    pub fn find_user_by_email(&self, email: &str) -> Option<&UserRecord> {
        let needle = email.trim();
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(needle))
    }

    pub fn find_user_by_id(&self, id: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.id == id)
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            admin_prefix: default_admin_prefix(),
            client_prefix: default_client_prefix(),
            login_path: default_login_path(),
            landing_path: default_landing_path(),
            exclude: default_exclusions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde defaults
// ---------------------------------------------------------------------------

pub fn default_port() -> u16 {
    3000
}

pub fn default_request_timeout() -> u64 {
    30
}

pub fn default_access_token_minutes() -> u64 {
    60
}

pub fn default_refresh_token_hours() -> u64 {
    24 * 7
}

pub fn default_resolve_timeout_ms() -> u64 {
    3000
}

pub fn default_access_cookie() -> String {
    "dash-access-token".to_string()
}

pub fn default_refresh_cookie() -> String {
    "dash-refresh-token".to_string()
}

pub fn default_secure_cookies() -> bool {
    true
}

pub fn default_admin_prefix() -> String {
    "/admin".to_string()
}

pub fn default_client_prefix() -> String {
    "/tools".to_string()
}

pub fn default_login_path() -> String {
    "/login".to_string()
}

pub fn default_landing_path() -> String {
    "/".to_string()
}

pub fn default_exclusions() -> Vec<String> {
    ["/api/*", "/static/*", "/image/*", "/favicon.ico", "/health"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
