//! Per-request cookie relay.
//!
//! A [`CookieTransaction`] is created from the inbound `Cookie` header, handed
//! down the request-handling chain, and applied to the outbound response once.
//! Writes are visible to later reads in the same request straight away, and
//! each cookie name produces at most one `Set-Cookie` header.

use std::time::{Duration, UNIX_EPOCH};

use hyper::Response;
use hyper::header::{COOKIE, HeaderMap, HeaderValue, SET_COOKIE};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    /// `None` makes a browser-session cookie.
    pub max_age: Option<Duration>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: None,
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingCookie {
    name: String,
    value: String,
    options: CookieOptions,
    removal: bool,
}

impl PendingCookie {
    fn to_header_value(&self) -> Option<HeaderValue> {
        let mut cookie = format!("{}={}", self.name, self.value);

        if self.removal {
            cookie.push_str("; Max-Age=0");
            cookie.push_str(&format!("; Expires={}", httpdate::fmt_http_date(UNIX_EPOCH)));
        } else if let Some(age) = self.options.max_age {
            cookie.push_str(&format!("; Max-Age={}", age.as_secs()));
        }

        cookie.push_str(&format!("; Path={}", self.options.path));

        if self.options.http_only {
            cookie.push_str("; HttpOnly");
        }

        if self.options.secure {
            cookie.push_str("; Secure");
        }

        cookie.push_str(&format!("; SameSite={}", self.options.same_site.as_str()));

        match HeaderValue::from_str(&cookie) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Dropping unencodable cookie {}: {}", self.name, e);
                None
            }
        }
    }
}

/// Request-local cookie set plus the response writes it has accumulated.
#[derive(Debug, Clone, Default)]
pub struct CookieTransaction {
    /// In request order; first occurrence of a name wins on parse.
    request: Vec<(String, String)>,
    pending: Vec<PendingCookie>,
}

impl CookieTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every `Cookie` header on the request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut tx = Self::new();
        for raw in headers.get_all(COOKIE).iter() {
            let Ok(raw) = raw.to_str() else {
                warn!("Ignoring non-ASCII cookie header");
                continue;
            };
            for pair in raw.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() || tx.request.iter().any(|(n, _)| n == name) {
                    continue;
                }
                tx.request.push((name.to_string(), value.trim().to_string()));
            }
        }
        tx
    }

    /// Current value of a cookie. A cookie with an empty value (what
    /// [`remove`](Self::remove) leaves behind) reads as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.request
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: &str, value: &str, options: CookieOptions) {
        debug!("Setting cookie: {}", name);
        self.write(name, value, options, false);
    }

    /// Same as `set(name, "", options)` with immediate expiry.
    pub fn remove(&mut self, name: &str, options: CookieOptions) {
        debug!("Removing cookie: {}", name);
        self.write(name, "", options, true);
    }

    fn write(&mut self, name: &str, value: &str, options: CookieOptions, removal: bool) {
        match self.request.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.request.push((name.to_string(), value.to_string())),
        }

        self.pending.retain(|p| p.name != name);
        self.pending.push(PendingCookie {
            name: name.to_string(),
            value: value.to_string(),
            options,
            removal,
        });
    }

    /// Whether any response cookie has been written.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Fold in a transaction that ran later in the same request. Its writes
    /// override ours name by name.
    pub fn merge(&mut self, later: CookieTransaction) {
        for p in later.pending {
            self.write(&p.name, &p.value, p.options, p.removal);
        }
    }

    /// `Cookie` header reflecting every write so far, or `None` when empty.
    pub fn request_header(&self) -> Option<HeaderValue> {
        let joined = self
            .request
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; ");
        if joined.is_empty() {
            return None;
        }
        HeaderValue::from_str(&joined).ok()
    }

    /// Replace the request's `Cookie` header so downstream handlers read the
    /// refreshed values.
    pub fn write_request_headers(&self, headers: &mut HeaderMap) {
        headers.remove(COOKIE);
        if let Some(value) = self.request_header() {
            headers.insert(COOKIE, value);
        }
    }

    /// Hand the transaction back to the access guard through the response
    /// extensions. The guard applies it; handlers never write `Set-Cookie`.
    pub fn attach<B>(self, response: &mut Response<B>) {
        if self.is_dirty() {
            response.extensions_mut().insert(self);
        }
    }

    pub fn take_attached<B>(response: &mut Response<B>) -> Option<Self> {
        response.extensions_mut().remove::<Self>()
    }

    /// Emit one `Set-Cookie` header per written cookie. Consumes the
    /// transaction so it cannot be applied twice.
    pub fn apply(self, headers: &mut HeaderMap) {
        for p in &self.pending {
            if let Some(value) = p.to_header_value() {
                headers.append(SET_COOKIE, value);
            }
        }
    }
}
