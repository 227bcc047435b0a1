//! Client-side guard for protected screens.
//!
//! The gateway already refuses protected pages to anonymous browsers; this
//! guard covers screens the client renders itself. Protected content is only
//! drawn once the store reports an authenticated session.

use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Paragraph};
use shared::types::Session;
use tokio::sync::watch;
use tracing::info;

use crate::navigator::Navigator;
use crate::session_store::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Authenticated(Session),
    Unauthenticated,
}

impl From<&SessionState> for GuardState {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Unresolved => GuardState::Loading,
            SessionState::Authenticated(s) => GuardState::Authenticated(s.clone()),
            SessionState::Anonymous => GuardState::Unauthenticated,
        }
    }
}

pub struct RouteGuard {
    sessions: watch::Receiver<SessionState>,
    navigator: Navigator,
    login_path: String,
    state: GuardState,
}

impl RouteGuard {
    pub fn new(
        sessions: watch::Receiver<SessionState>,
        navigator: Navigator,
        login_path: &str,
    ) -> Self {
        Self {
            sessions,
            navigator,
            login_path: login_path.to_string(),
            state: GuardState::Loading,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Pull the latest store state. Entering `Unauthenticated` navigates to
    /// the login screen, once per entry.
    pub fn observe(&mut self) -> &GuardState {
        let next = GuardState::from(&*self.sessions.borrow_and_update());
        if next == GuardState::Unauthenticated && self.state != GuardState::Unauthenticated {
            info!("No session; redirecting to {}", self.login_path);
            self.navigator.navigate(&self.login_path);
        }
        self.state = next;
        &self.state
    }

    /// Draw `protected` for an authenticated session, a placeholder otherwise.
    pub fn render<F>(&self, frame: &mut Frame, area: Rect, protected: F)
    where
        F: FnOnce(&mut Frame, Rect, &Session),
    {
        match &self.state {
            GuardState::Authenticated(session) => protected(frame, area, session),
            GuardState::Loading => placeholder(frame, area, "Checking session…"),
            GuardState::Unauthenticated => placeholder(frame, area, "Redirecting to sign-in…"),
        }
    }
}

fn placeholder(frame: &mut Frame, area: Rect, text: &str) {
    let widget = Paragraph::new(text)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(widget, area);
}
