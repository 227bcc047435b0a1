//! Client session store.
//!
//! One slot holds the current [`SessionState`]. Two writers feed it at
//! start-up: a one-shot `get_session` check and the provider's auth-state
//! subscription. They race; the rules are:
//!
//! - a subscription event always applies;
//! - the one-shot result applies only while the state is still
//!   `Unresolved`, so it can never overwrite what an event (or a sign-out)
//!   already settled;
//! - writing the value already held is a no-op and wakes no observers.

use std::sync::Arc;
use std::time::Duration;

use shared::types::Session;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::{AuthEvent, ClientError, IdentityClient};
use crate::navigator::Navigator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unresolved,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Unresolved)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<Session>> for SessionState {
    fn from(session: Option<Session>) -> Self {
        match session {
            Some(s) => SessionState::Authenticated(s),
            None => SessionState::Anonymous,
        }
    }
}

pub struct SessionStore<C> {
    client: Arc<C>,
    navigator: Navigator,
    login_path: String,
    state: watch::Sender<SessionState>,
}

impl<C: IdentityClient> SessionStore<C> {
    pub fn new(client: Arc<C>, navigator: Navigator, login_path: &str) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Unresolved);
        Arc::new(Self {
            client,
            navigator,
            login_path: login_path.to_string(),
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Start both resolution paths. The subscription is taken before the
    /// one-shot check is spawned so no event can slip between them.
    pub fn start(self: &Arc<Self>, resolve_timeout: Duration) -> StoreTasks {
        let events = self.client.subscribe();

        let store = self.clone();
        let listener = tokio::spawn(async move { store.listen(events).await });

        let store = self.clone();
        let initial = tokio::spawn(async move {
            let session = store.initial_check(resolve_timeout).await;
            store.apply_initial(session);
        });

        StoreTasks { initial, listener }
    }

    async fn initial_check(&self, limit: Duration) -> Option<Session> {
        match tokio::time::timeout(limit, self.client.get_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!("Initial session check failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Initial session check timed out after {:?}", limit);
                None
            }
        }
    }

    async fn listen(&self, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!("Auth event: {:?}", event);
                    self.apply_event(event.into_session());
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed events are unrecoverable; ask for the truth.
                    warn!("Missed {} auth event(s); re-checking session", missed);
                    match self.client.get_session().await {
                        Ok(session) => self.apply_event(session),
                        Err(e) => warn!("Session re-check failed: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Auth event stream closed");
                    return;
                }
            }
        }
    }

    /// Setter for the subscription path; always wins.
    pub fn apply_event(&self, session: Option<Session>) {
        let next = SessionState::from(session);
        self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            *cur = next;
            true
        });
    }

    /// Setter for the one-shot path; only fills an unresolved slot.
    pub fn apply_initial(&self, session: Option<Session>) {
        let next = SessionState::from(session);
        let applied = self.state.send_if_modified(|cur| {
            if cur.is_resolved() {
                return false;
            }
            *cur = next;
            true
        });
        if !applied {
            debug!("Initial session check arrived after an auth event; ignored");
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let session = self.client.sign_in(email, password).await?;
        self.apply_event(Some(session.clone()));
        Ok(session)
    }

    /// Invalidate the session at the provider, clear it locally no matter
    /// what the provider said, and go to the login screen.
    pub async fn sign_out(&self) {
        if let Err(e) = self.client.sign_out().await {
            warn!("Provider sign-out failed; clearing local session anyway: {}", e);
        }
        self.apply_event(None);
        info!("Signed out");
        self.navigator.navigate(&self.login_path);
    }
}

/// Handles to the start-up tasks.
#[derive(Debug)]
pub struct StoreTasks {
    pub initial: JoinHandle<()>,
    pub listener: JoinHandle<()>,
}

impl StoreTasks {
    pub fn abort(&self) {
        self.initial.abort();
        self.listener.abort();
    }
}
