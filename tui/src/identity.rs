//! Client side of the identity provider: the gateway's `/api/auth/*`
//! endpoints behind a cookie-holding HTTP client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use shared::types::{ErrorResponse, Session, SuccessResponse};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 16;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {code}")]
    Api { status: u16, code: String },
}

/// Auth-state change notification. Every event carries the whole new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    /// Tokens were rotated; claims may have changed.
    Refreshed(Session),
    SignedOut,
}

impl AuthEvent {
    pub fn into_session(self) -> Option<Session> {
        match self {
            AuthEvent::SignedIn(s) | AuthEvent::Refreshed(s) => Some(s),
            AuthEvent::SignedOut => None,
        }
    }
}

/// What the session store needs from an identity provider.
pub trait IdentityClient: Send + Sync + 'static {
    /// Current persisted session, if any.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, ClientError>> + Send;

    /// Standing subscription to auth-state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, ClientError>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// [`IdentityClient`] over HTTP. Auth cookies live in reqwest's cookie store,
/// so refreshed tokens are picked up transparently.
#[derive(Debug)]
pub struct HttpIdentityClient {
    base: Url,
    client: reqwest::Client,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpIdentityClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            base,
            client,
            events,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Re-check the session every `every` and publish the answer: a live
    /// session as `Refreshed`, none as `SignedOut`. Subscribers drop repeats.
    pub fn spawn_watcher(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.get_session().await {
                    Ok(Some(session)) => client.emit(AuthEvent::Refreshed(session)),
                    Ok(None) => client.emit(AuthEvent::SignedOut),
                    Err(e) => debug!("Session check failed: {}", e),
                }
            }
        })
    }
}

/// Unwrap `{status, data}` or map the error envelope.
async fn read_envelope<T: DeserializeOwned>(
    res: reqwest::Response,
) -> Result<Option<T>, ClientError> {
    let status = res.status();
    if status.is_success() {
        let body: SuccessResponse<T> = res.json().await?;
        return Ok(body.data);
    }
    let code = match res.json::<ErrorResponse>().await {
        Ok(e) => e.code,
        Err(_) => "UNKNOWN".to_string(),
    };
    if status == StatusCode::UNAUTHORIZED && code == "INVALID_CREDENTIALS" {
        return Err(ClientError::InvalidCredentials);
    }
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
    })
}

impl IdentityClient for HttpIdentityClient {
    async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        let res = self.client.get(self.url("/api/auth/session")?).send().await?;
        read_envelope(res).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let res = self
            .client
            .post(self.url("/api/auth/login")?)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session: Option<Session> = read_envelope(res).await?;
        let Some(session) = session else {
            warn!("Login succeeded without a session payload");
            return Err(ClientError::Api {
                status: 200,
                code: "EMPTY_SESSION".to_string(),
            });
        };

        info!("Signed in as {} ({})", session.email, session.role);
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        let res = self.client.post(self.url("/api/auth/logout")?).send().await;
        // Subscribers hear about it even when the server could not be reached.
        self.emit(AuthEvent::SignedOut);
        read_envelope::<serde_json::Value>(res?).await?;
        Ok(())
    }
}
