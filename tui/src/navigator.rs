//! Client-side navigation: the path of the screen currently shown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Navigator {
    current: Arc<watch::Sender<String>>,
}

impl Navigator {
    pub fn new(initial: &str) -> Self {
        let (tx, _) = watch::channel(initial.to_string());
        Self {
            current: Arc::new(tx),
        }
    }

    /// Go to `path`. Navigating to the current path is a no-op.
    pub fn navigate(&self, path: &str) {
        let changed = self.current.send_if_modified(|cur| {
            if cur == path {
                return false;
            }
            *cur = path.to_string();
            true
        });
        if changed {
            debug!("Navigated to {}", path);
        }
    }

    pub fn current(&self) -> String {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_navigation_notifies_once() {
        let nav = Navigator::new("/");
        let mut rx = nav.subscribe();
        nav.navigate("/login");
        nav.navigate("/login");
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(nav.current(), "/login");
    }
}
