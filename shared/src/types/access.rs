use std::fmt;

/// Where a request path falls in the access model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    AdminScoped,
    /// `site_id` is the segment right after the client prefix, `None` when the
    /// path stops at the prefix.
    ClientScoped { site_id: Option<String> },
}

/// Outcome of evaluating a session against a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Redirect(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Redirect(target) => Some(target),
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Redirect(target) => write!(f, "redirect -> {}", target),
        }
    }
}
