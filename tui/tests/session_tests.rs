/// Session store precedence and the app's guarded screens, driven by an
/// in-memory identity client.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Terminal;
use ratatui::backend::TestBackend;
use shared::types::{Role, Session};
use tokio::sync::{broadcast, watch};

use tui::app::{App, DASHBOARD_PATH, LOGIN_PATH};
use tui::identity::{AuthEvent, ClientError, IdentityClient};
use tui::navigator::Navigator;
use tui::route_guard::GuardState;
use tui::session_store::{SessionState, SessionStore};

// ---------------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------------

struct MockClient {
    initial: Mutex<Option<Session>>,
    initial_delay: Duration,
    fail_initial: bool,
    fail_sign_out: bool,
    events: broadcast::Sender<AuthEvent>,
    sign_outs: AtomicUsize,
}

impl MockClient {
    fn new(initial: Option<Session>) -> Self {
        Self {
            initial: Mutex::new(initial),
            initial_delay: Duration::ZERO,
            fail_initial: false,
            fail_sign_out: false,
            events: broadcast::channel(8).0,
            sign_outs: AtomicUsize::new(0),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn emit(&self, event: AuthEvent) {
        self.events.send(event).unwrap();
    }
}

impl IdentityClient for MockClient {
    async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        tokio::time::sleep(self.initial_delay).await;
        if self.fail_initial {
            return Err(ClientError::Api {
                status: 503,
                code: "UNAVAILABLE".to_string(),
            });
        }
        Ok(self.initial.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        if password != "pw" {
            return Err(ClientError::InvalidCredentials);
        }
        let s = session(email, Role::Client, &["siteA", "siteB"]);
        let _ = self.events.send(AuthEvent::SignedIn(s.clone()));
        Ok(s)
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out {
            return Err(ClientError::Api {
                status: 500,
                code: "INTERNAL_ERROR".to_string(),
            });
        }
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }
}

fn session(email: &str, role: Role, sites: &[&str]) -> Session {
    Session {
        user_id: format!("id-{email}"),
        email: email.to_string(),
        role,
        authorized_sites: sites.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        issued_at: 0,
        expires_at: i64::MAX,
    }
}

async fn resolved(rx: &mut watch::Receiver<SessionState>) -> SessionState {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.is_resolved()))
        .await
        .expect("store never resolved")
        .unwrap()
        .clone()
}

fn store_with(
    client: MockClient,
) -> (Arc<MockClient>, Navigator, Arc<SessionStore<MockClient>>) {
    let client = Arc::new(client);
    let nav = Navigator::new(DASHBOARD_PATH);
    let store = SessionStore::new(client.clone(), nav.clone(), LOGIN_PATH);
    (client, nav, store)
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn starts_unresolved() {
    let (_client, _nav, store) = store_with(MockClient::new(None));
    assert_eq!(store.current(), SessionState::Unresolved);
}

#[tokio::test]
async fn initial_check_resolves_authenticated() {
    let alice = session("alice@example.com", Role::Admin, &[]);
    let (_client, _nav, store) = store_with(MockClient::new(Some(alice.clone())));
    let mut rx = store.subscribe();
    let _tasks = store.start(Duration::from_secs(1));
    assert_eq!(resolved(&mut rx).await, SessionState::Authenticated(alice));
}

#[tokio::test]
async fn initial_check_without_session_is_anonymous() {
    let (_client, _nav, store) = store_with(MockClient::new(None));
    let mut rx = store.subscribe();
    let _tasks = store.start(Duration::from_secs(1));
    assert_eq!(resolved(&mut rx).await, SessionState::Anonymous);
}

#[tokio::test]
async fn initial_failure_resolves_anonymous() {
    let mut client = MockClient::new(Some(session("a@example.com", Role::Client, &[])));
    client.fail_initial = true;
    let (_client, _nav, store) = store_with(client);
    let mut rx = store.subscribe();
    let _tasks = store.start(Duration::from_secs(1));
    assert_eq!(resolved(&mut rx).await, SessionState::Anonymous);
}

#[tokio::test]
async fn initial_timeout_resolves_anonymous() {
    let client = MockClient::new(Some(session("a@example.com", Role::Client, &[])))
        .delayed(Duration::from_secs(5));
    let (_client, _nav, store) = store_with(client);
    let mut rx = store.subscribe();
    let tasks = store.start(Duration::from_millis(50));
    assert_eq!(resolved(&mut rx).await, SessionState::Anonymous);
    tasks.abort();
}

#[tokio::test]
async fn event_before_initial_result_wins() {
    let stale = session("stale@example.com", Role::Client, &["siteA"]);
    let client = MockClient::new(Some(stale)).delayed(Duration::from_millis(100));
    let (client, _nav, store) = store_with(client);
    let mut rx = store.subscribe();
    let tasks = store.start(Duration::from_secs(1));

    client.emit(AuthEvent::SignedOut);
    assert_eq!(resolved(&mut rx).await, SessionState::Anonymous);

    // The slow one-shot finishes later with a session; it must not apply.
    tasks.initial.await.unwrap();
    assert_eq!(store.current(), SessionState::Anonymous);
}

#[tokio::test]
async fn later_sign_out_event_overrides_authenticated() {
    let alice = session("alice@example.com", Role::Client, &["siteA"]);
    let (client, _nav, store) = store_with(MockClient::new(Some(alice)));
    let mut rx = store.subscribe();
    let _tasks = store.start(Duration::from_secs(1));
    assert!(resolved(&mut rx).await.session().is_some());

    client.emit(AuthEvent::SignedOut);
    let state = tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|s| *s == SessionState::Anonymous),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(state, SessionState::Anonymous);
}

#[tokio::test]
async fn refreshed_claims_replace_the_session() {
    let before = session("alice@example.com", Role::Client, &["siteA"]);
    let after = session("alice@example.com", Role::Client, &["siteB"]);
    let (client, _nav, store) = store_with(MockClient::new(Some(before)));
    let mut rx = store.subscribe();
    let _tasks = store.start(Duration::from_secs(1));
    resolved(&mut rx).await;

    client.emit(AuthEvent::Refreshed(after.clone()));
    let expected = SessionState::Authenticated(after);
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn identical_update_does_not_notify() {
    let alice = session("alice@example.com", Role::Admin, &[]);
    let (_client, _nav, store) = store_with(MockClient::new(None));
    let mut rx = store.subscribe();

    store.apply_event(Some(alice.clone()));
    assert!(rx.has_changed().unwrap());
    rx.mark_unchanged();

    store.apply_event(Some(alice));
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn initial_result_ignored_once_resolved() {
    let (_client, _nav, store) = store_with(MockClient::new(None));
    store.apply_event(None);
    store.apply_initial(Some(session("a@example.com", Role::Admin, &[])));
    assert_eq!(store.current(), SessionState::Anonymous);
}

#[tokio::test]
async fn sign_out_clears_and_navigates_even_when_provider_fails() {
    let mut client = MockClient::new(None);
    client.fail_sign_out = true;
    let (client, nav, store) = store_with(client);
    store.apply_event(Some(session("a@example.com", Role::Client, &["siteA"])));

    store.sign_out().await;

    assert_eq!(client.sign_outs.load(Ordering::SeqCst), 1);
    assert_eq!(store.current(), SessionState::Anonymous);
    assert_eq!(nav.current(), LOGIN_PATH);
}

// ---------------------------------------------------------------------------
// App screens
// ---------------------------------------------------------------------------

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn screen<C: IdentityClient>(app: &App<C>) -> String {
    let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();
    terminal.draw(|f| app.draw(f)).unwrap();
    terminal
        .backend()
        .buffer()
        .content()
        .iter()
        .map(|c| c.symbol())
        .collect()
}

async fn type_text<C: IdentityClient>(app: &mut App<C>, text: &str) {
    for c in text.chars() {
        app.handle_key(key(KeyCode::Char(c))).await;
    }
}

#[tokio::test]
async fn dashboard_is_hidden_while_loading() {
    let (_client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store, nav);
    app.sync();
    assert_eq!(app.guard_state(), &GuardState::Loading);
    let text = screen(&app);
    assert!(text.contains("Checking session"));
    assert!(!text.contains("Account"));
}

#[tokio::test]
async fn anonymous_user_lands_on_login_and_signs_in() {
    let (_client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store.clone(), nav.clone());
    store.apply_initial(None);
    app.sync();
    assert_eq!(nav.current(), LOGIN_PATH);
    assert!(screen(&app).contains("Email"));

    type_text(&mut app, "bob@example.com").await;
    app.handle_key(key(KeyCode::Tab)).await;
    type_text(&mut app, "pw").await;
    assert!(!screen(&app).contains("pw"));
    app.handle_key(key(KeyCode::Enter)).await;

    app.sync();
    assert_eq!(nav.current(), DASHBOARD_PATH);
    let text = screen(&app);
    assert!(text.contains("bob@example.com"));
    assert!(text.contains("siteA"));
}

#[tokio::test]
async fn wrong_password_stays_on_login_with_error() {
    let (_client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store.clone(), nav.clone());
    store.apply_initial(None);
    app.sync();

    type_text(&mut app, "bob@example.com").await;
    app.handle_key(key(KeyCode::Tab)).await;
    type_text(&mut app, "nope").await;
    app.handle_key(key(KeyCode::Enter)).await;
    app.sync();

    assert_eq!(nav.current(), LOGIN_PATH);
    assert!(app.form.password.is_empty());
    assert!(screen(&app).contains("Invalid email or password"));
}

#[tokio::test]
async fn q_on_login_is_typed_not_quit() {
    let (_client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store.clone(), nav);
    store.apply_initial(None);
    app.sync();
    assert!(!app.handle_key(key(KeyCode::Char('q'))).await);
    assert_eq!(app.form.email, "q");
    assert!(app.handle_key(key(KeyCode::Esc)).await);
}

#[tokio::test]
async fn sign_out_key_returns_to_login() {
    let alice = session("alice@example.com", Role::Client, &["siteA", "siteB"]);
    let (client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store.clone(), nav.clone());
    store.apply_initial(Some(alice));
    app.sync();
    assert!(matches!(app.guard_state(), GuardState::Authenticated(_)));

    app.handle_key(key(KeyCode::Char('s'))).await;
    assert!(!app.handle_key(key(KeyCode::Char('o'))).await);
    app.sync();

    assert_eq!(client.sign_outs.load(Ordering::SeqCst), 1);
    assert_eq!(nav.current(), LOGIN_PATH);
    assert!(!screen(&app).contains("alice@example.com"));
}

#[tokio::test]
async fn expired_session_on_dashboard_redirects() {
    let alice = session("alice@example.com", Role::Admin, &[]);
    let (_client, nav, store) = store_with(MockClient::new(None));
    let mut app = App::new(store.clone(), nav.clone());
    store.apply_initial(Some(alice));
    app.sync();
    assert!(screen(&app).contains("All sites (admin)"));

    store.apply_event(None);
    app.sync();
    assert_eq!(nav.current(), LOGIN_PATH);
}
