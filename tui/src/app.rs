//! Screens and key handling for the terminal dashboard.
//!
//! Two screens, chosen by the navigator's current path: the sign-in form and
//! the dashboard. The dashboard sits behind the [`RouteGuard`].

use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use shared::types::{Role, Session};
use tracing::debug;

use crate::identity::{ClientError, IdentityClient};
use crate::navigator::Navigator;
use crate::route_guard::{GuardState, RouteGuard};
use crate::session_store::SessionStore;

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginField {
    #[default]
    Email,
    Password,
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub focus: LoginField,
    pub error: Option<String>,
}

impl LoginForm {
    fn field_mut(&mut self) -> &mut String {
        match self.focus {
            LoginField::Email => &mut self.email,
            LoginField::Password => &mut self.password,
        }
    }

    fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            LoginField::Email => LoginField::Password,
            LoginField::Password => LoginField::Email,
        };
    }
}

pub struct App<C> {
    store: Arc<SessionStore<C>>,
    navigator: Navigator,
    guard: RouteGuard,
    pub form: LoginForm,
    selected_site: usize,
}

impl<C: IdentityClient> App<C> {
    pub fn new(store: Arc<SessionStore<C>>, navigator: Navigator) -> Self {
        let guard = RouteGuard::new(store.subscribe(), navigator.clone(), LOGIN_PATH);
        Self {
            store,
            navigator,
            guard,
            form: LoginForm::default(),
            selected_site: 0,
        }
    }

    pub fn path(&self) -> String {
        self.navigator.current()
    }

    /// Fold in store changes. Only the dashboard is guarded; a session that
    /// resolves while the sign-in form is up moves straight to the dashboard.
    /// Call before every draw.
    pub fn sync(&mut self) {
        if self.path() == LOGIN_PATH && self.store.current().session().is_some() {
            self.navigator.navigate(DASHBOARD_PATH);
        }
        if self.path() != LOGIN_PATH {
            self.guard.observe();
        }
    }

    pub fn guard_state(&self) -> &GuardState {
        self.guard.state()
    }

    /// Handle one key press. Returns `true` when the app should quit.
    pub async fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }

        if self.path() == LOGIN_PATH {
            return self.handle_login_key(key).await;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Char('s') => self.next_site(),
            KeyCode::Char('o') => {
                if matches!(self.guard.state(), GuardState::Authenticated(_)) {
                    self.store.sign_out().await;
                    self.form = LoginForm::default();
                }
            }
            _ => {}
        }
        false
    }

    async fn handle_login_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.form.toggle_focus()
            }
            KeyCode::Backspace => {
                self.form.field_mut().pop();
            }
            KeyCode::Enter => self.submit().await,
            KeyCode::Char(c) => self.form.field_mut().push(c),
            _ => {}
        }
        false
    }

    async fn submit(&mut self) {
        if self.form.email.trim().is_empty() || self.form.password.is_empty() {
            self.form.error = Some("Email and password are required".to_string());
            return;
        }

        match self.store.sign_in(&self.form.email, &self.form.password).await {
            Ok(session) => {
                debug!("Signed in as {}", session.email);
                self.form = LoginForm::default();
                self.selected_site = 0;
                self.navigator.navigate(DASHBOARD_PATH);
            }
            Err(ClientError::InvalidCredentials) => {
                self.form.password.clear();
                self.form.error = Some("Invalid email or password".to_string());
            }
            Err(e) => self.form.error = Some(format!("Sign-in failed: {}", e)),
        }
    }

    fn next_site(&mut self) {
        if let GuardState::Authenticated(session) = self.guard.state() {
            let count = session.authorized_sites.len();
            if count > 0 {
                self.selected_site = (self.selected_site + 1) % count;
            }
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        if self.path() == LOGIN_PATH {
            draw_login(frame, area, &self.form);
        } else {
            let selected = self.selected_site;
            self.guard.render(frame, area, |f, a, session| {
                draw_dashboard(f, a, session, selected)
            });
        }
    }
}

fn draw_login(frame: &mut Frame, area: Rect, form: &LoginForm) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(area);

    let field = |title: &'static str, value: String, focused: bool| {
        let style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        Paragraph::new(value).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(style),
        )
    };

    frame.render_widget(
        field(
            "Email",
            form.email.clone(),
            form.focus == LoginField::Email,
        ),
        chunks[0],
    );
    frame.render_widget(
        field(
            "Password",
            "*".repeat(form.password.chars().count()),
            form.focus == LoginField::Password,
        ),
        chunks[1],
    );

    let status = match &form.error {
        Some(err) => Line::from(Span::styled(err.clone(), Style::default().fg(Color::Red))),
        None => Line::from("Tab: switch field  Enter: sign in  Esc: quit"),
    };
    frame.render_widget(Paragraph::new(status), chunks[2]);
}

fn draw_dashboard(frame: &mut Frame, area: Rect, session: &Session, selected: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    let header = vec![
        Line::from(vec![
            Span::styled("Account: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(session.email.clone()),
        ]),
        Line::from(vec![
            Span::styled("Role: ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(session.role.to_string()),
        ]),
    ];
    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("Session")),
        chunks[0],
    );

    let items: Vec<ListItem> = if session.role == Role::Admin && session.authorized_sites.is_empty()
    {
        vec![ListItem::new("All sites (admin)")]
    } else {
        session
            .authorized_sites
            .iter()
            .map(|s| ListItem::new(s.clone()))
            .collect()
    };
    let mut list_state = ListState::default();
    if !session.authorized_sites.is_empty() {
        list_state.select(Some(selected.min(session.authorized_sites.len() - 1)));
    }
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Sites"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, chunks[1], &mut list_state);

    frame.render_widget(
        Paragraph::new("s: next site  o: sign out  q: quit"),
        chunks[2],
    );
}
