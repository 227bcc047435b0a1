use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde_json::Value;
use shared::config::LiveConfig;
use shared::types::server_config::UserRecord;
use shared::types::{AccessClaims, Session};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cookies::{CookieOptions, CookieTransaction};
use crate::identity::{IdentityError, IdentityProvider, password, unix_now};

/// How long a rotated-away refresh token keeps answering. Covers a browser
/// firing parallel requests that all carry the pre-rotation cookie.
const ROTATION_GRACE_SECS: i64 = 10;

#[derive(Debug, Clone)]
struct RefreshRecord {
    user_id: String,
    session_id: String,
    expires_at: i64,
    rotated: Option<Rotation>,
}

#[derive(Debug, Clone)]
struct Rotation {
    at: i64,
    successor: String,
}

/// Outcome of presenting a refresh token that exists and has not expired.
#[derive(Debug)]
enum RefreshClaim {
    /// First use; carries the freshly recorded successor.
    Rotated(String),
    /// Already rotated, still inside the grace window.
    Grace(String),
    Replayed,
}

/// Snapshot of the token settings, copied out of [`LiveConfig`] so no read
/// guard is held across `.await`.
#[derive(Debug, Clone)]
struct TokenSettings {
    access_cookie: String,
    refresh_cookie: String,
    secure: bool,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenSettings {
    fn cookie_options(&self) -> CookieOptions {
        CookieOptions::default()
            .secure(self.secure)
            .max_age(Duration::from_secs(self.refresh_ttl.max(0) as u64))
    }

    fn removal_options(&self) -> CookieOptions {
        CookieOptions::default().secure(self.secure)
    }
}

pub struct JwtIdentityProvider {
    config: LiveConfig,
    /// Read once at startup; see `AuthConfig::jwt_secret`.
    secret: String,
    refresh_tokens: RwLock<HashMap<String, RefreshRecord>>,
}

impl std::fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityProvider")
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl JwtIdentityProvider {
    pub fn new(config: LiveConfig, secret: String) -> Self {
        Self {
            config,
            secret,
            refresh_tokens: RwLock::new(HashMap::new()),
        }
    }

    async fn settings(&self) -> TokenSettings {
        let cfg = self.config.read().await;
        TokenSettings {
            access_cookie: cfg.auth.access_cookie.clone(),
            refresh_cookie: cfg.auth.refresh_cookie.clone(),
            secure: cfg.auth.secure_cookies,
            access_ttl: cfg.auth.access_token_secs() as i64,
            refresh_ttl: cfg.auth.refresh_token_secs() as i64,
        }
    }

    async fn find_user(&self, user_id: &str) -> Option<UserRecord> {
        self.config.read().await.find_user_by_id(user_id).cloned()
    }

    /// Sign arbitrary claims with the gateway key.
    pub fn mint(&self, claims: &AccessClaims) -> Result<String, IdentityError> {
        Ok(encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    /// Verify signature and expiry (no leeway).
    pub fn verify(&self, token: &str) -> Result<AccessClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }

    /// Number of live refresh tokens; rotated-away ones are not counted.
    pub async fn active_refresh_tokens(&self) -> usize {
        self.refresh_tokens
            .read()
            .await
            .values()
            .filter(|r| r.rotated.is_none())
            .count()
    }

    fn claims_for(&self, user: &UserRecord, session_id: &str, now: i64, ttl: i64) -> AccessClaims {
        AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            sites: Value::from(user.sites.clone()),
            sid: session_id.to_string(),
            iat: now,
            exp: now + ttl,
        }
    }

    /// Mint an access token, write the access cookie, return the session.
    fn write_access(
        &self,
        user: &UserRecord,
        session_id: &str,
        settings: &TokenSettings,
        cookies: &mut CookieTransaction,
    ) -> Result<Session, IdentityError> {
        let claims = self.claims_for(user, session_id, unix_now(), settings.access_ttl);
        let token = self.mint(&claims)?;
        cookies.set(&settings.access_cookie, &token, settings.cookie_options());
        Ok(Session::from_claims(&claims))
    }

    /// Issue a full token pair for `user` under `session_id`.
    async fn issue(
        &self,
        user: &UserRecord,
        session_id: &str,
        settings: &TokenSettings,
        cookies: &mut CookieTransaction,
    ) -> Result<Session, IdentityError> {
        let session = self.write_access(user, session_id, settings, cookies)?;
        let refresh = random_token();

        self.refresh_tokens.write().await.insert(
            refresh.clone(),
            RefreshRecord {
                user_id: user.id.clone(),
                session_id: session_id.to_string(),
                expires_at: unix_now() + settings.refresh_ttl,
                rotated: None,
            },
        );
        cookies.set(&settings.refresh_cookie, &refresh, settings.cookie_options());

        Ok(session)
    }

    fn clear(&self, settings: &TokenSettings, cookies: &mut CookieTransaction) {
        cookies.remove(&settings.access_cookie, settings.removal_options());
        cookies.remove(&settings.refresh_cookie, settings.removal_options());
    }

    /// Exchange a refresh token for a new pair. Claims are rebuilt from the
    /// current user directory so role or site edits take effect here.
    async fn refresh(
        &self,
        refresh: &str,
        settings: &TokenSettings,
        cookies: &mut CookieTransaction,
    ) -> Result<Option<Session>, IdentityError> {
        let (record, claim) = match self.claim_refresh(refresh, settings).await {
            Some(claimed) => claimed,
            None => {
                self.clear(settings, cookies);
                return Ok(None);
            }
        };

        let successor = match claim {
            RefreshClaim::Rotated(successor) => {
                debug!("Rotated refresh token for user {}", record.user_id);
                successor
            }
            RefreshClaim::Grace(successor) => {
                debug!("Refresh token reused within grace window; reissuing access token");
                successor
            }
            RefreshClaim::Replayed => {
                warn!(
                    "Stale refresh token replayed for user {}; revoking session {}",
                    record.user_id, record.session_id
                );
                self.revoke_session(&record.session_id).await;
                self.clear(settings, cookies);
                return Ok(None);
            }
        };

        let Some(user) = self.find_user(&record.user_id).await else {
            warn!("Refresh for user {} who left the directory", record.user_id);
            self.revoke_session(&record.session_id).await;
            self.clear(settings, cookies);
            return Ok(None);
        };

        let session = self.write_access(&user, &record.session_id, settings, cookies)?;
        cookies.set(&settings.refresh_cookie, &successor, settings.cookie_options());
        Ok(Some(session))
    }

    /// Look up `refresh` and, if it is still live, rotate it. Lookup, rotation
    /// and successor insert share one write lock, so concurrent callers with
    /// the same token all land on the same successor.
    async fn claim_refresh(
        &self,
        refresh: &str,
        settings: &TokenSettings,
    ) -> Option<(RefreshRecord, RefreshClaim)> {
        let now = unix_now();
        let mut tokens = self.refresh_tokens.write().await;

        let Some(record) = tokens.get(refresh).cloned() else {
            info!("Unknown refresh token presented; clearing auth cookies");
            return None;
        };

        if record.expires_at <= now {
            info!("Refresh token for user {} expired", record.user_id);
            tokens.remove(refresh);
            return None;
        }

        if let Some(rotation) = &record.rotated {
            let claim = if now - rotation.at <= ROTATION_GRACE_SECS {
                RefreshClaim::Grace(rotation.successor.clone())
            } else {
                RefreshClaim::Replayed
            };
            return Some((record, claim));
        }

        let successor = random_token();
        tokens.insert(
            successor.clone(),
            RefreshRecord {
                user_id: record.user_id.clone(),
                session_id: record.session_id.clone(),
                expires_at: now + settings.refresh_ttl,
                rotated: None,
            },
        );
        if let Some(old) = tokens.get_mut(refresh) {
            old.rotated = Some(Rotation {
                at: now,
                successor: successor.clone(),
            });
        }
        Some((record, RefreshClaim::Rotated(successor)))
    }

    async fn revoke_session(&self, session_id: &str) {
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, r| r.session_id != session_id);
        debug!(
            "Revoked {} refresh token(s) for session {}",
            before - tokens.len(),
            session_id
        );
    }

    /// Drop expired records and rotated records past their grace window.
    pub async fn prune(&self) {
        let now = unix_now();
        let mut tokens = self.refresh_tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, r| {
            r.expires_at > now
                && r.rotated
                    .as_ref()
                    .is_none_or(|rot| now - rot.at <= ROTATION_GRACE_SECS)
        });
        if before != tokens.len() {
            info!(
                "Refresh token cleanup: removed {} ({} → {} remaining)",
                before - tokens.len(),
                before,
                tokens.len()
            );
        }
    }
}

impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(
        &self,
        cookies: &mut CookieTransaction,
    ) -> Result<Option<Session>, IdentityError> {
        let settings = self.settings().await;

        if let Some(token) = cookies.get(&settings.access_cookie) {
            match self.verify(token) {
                Ok(claims) => return Ok(Some(Session::from_claims(&claims))),
                Err(IdentityError::Token(e)) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                    debug!("Access token expired; attempting refresh");
                }
                Err(e) => {
                    warn!("Rejected access token: {}", e);
                    self.clear(&settings, cookies);
                    return Ok(None);
                }
            }
        }

        let Some(refresh) = cookies.get(&settings.refresh_cookie).map(str::to_string) else {
            if cookies.get(&settings.access_cookie).is_some() {
                cookies.remove(&settings.access_cookie, settings.removal_options());
            }
            return Ok(None);
        };

        self.refresh(&refresh, &settings, cookies).await
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
        cookies: &mut CookieTransaction,
    ) -> Result<Session, IdentityError> {
        let settings = self.settings().await;
        let user = self.config.read().await.find_user_by_email(email).cloned();

        let Some(user) = user else {
            info!("Sign-in for unknown email {}", email);
            return Err(IdentityError::InvalidCredentials);
        };

        // argon2 is CPU-bound; keep it off the reactor threads.
        let candidate = password.to_string();
        let phc = user.password_hash.clone();
        let valid =
            tokio::task::spawn_blocking(move || password::verify_password(&candidate, &phc))
                .await??;

        if !valid {
            info!("Sign-in rejected for {}", user.email);
            return Err(IdentityError::InvalidCredentials);
        }

        let session_id = Uuid::new_v4().to_string();
        let session = self.issue(&user, &session_id, &settings, cookies).await?;

        info!(
            "User {} signed in as {} (session {})",
            user.email, session.role, session_id
        );
        Ok(session)
    }

    async fn sign_out(&self, cookies: &mut CookieTransaction) -> Result<(), IdentityError> {
        let settings = self.settings().await;

        let session_id = match cookies.get(&settings.refresh_cookie) {
            Some(refresh) => self
                .refresh_tokens
                .read()
                .await
                .get(refresh)
                .map(|r| r.session_id.clone()),
            None => None,
        };

        // An expired access token still names its session; signature must hold.
        let session_id = session_id.or_else(|| {
            cookies
                .get(&settings.access_cookie)
                .and_then(|t| self.verify_ignoring_expiry(t).ok())
                .map(|c| c.sid)
        });

        if let Some(sid) = &session_id {
            self.revoke_session(sid).await;
            info!("Signed out session {}", sid);
        } else {
            debug!("Sign-out without a live session");
        }

        self.clear(&settings, cookies);
        Ok(())
    }
}

impl JwtIdentityProvider {
    fn verify_ignoring_expiry(&self, token: &str) -> Result<AccessClaims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
