//! Route classification and the access decision.
//!
//! [`AccessPolicy::evaluate`] is a pure function of the session and the path:
//! no state is kept between calls, so it is safe to call concurrently and
//! gives the same answer every time for the same inputs.

pub mod matcher;

pub use self::matcher::{ExclusionSet, clean_path, path_matches};

use tracing::{debug, info};

use crate::types::access::{AccessDecision, RouteClass};
use crate::types::server_config::RoutesConfig;
use crate::types::session::{Role, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    admin_prefix: String,
    client_prefix: String,
    login_path: String,
    landing_path: String,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::from_routes(&RoutesConfig::default())
    }
}

impl AccessPolicy {
    pub fn new(
        admin_prefix: impl Into<String>,
        client_prefix: impl Into<String>,
        login_path: impl Into<String>,
        landing_path: impl Into<String>,
    ) -> Self {
        Self {
            admin_prefix: normalize_prefix(admin_prefix.into()),
            client_prefix: normalize_prefix(client_prefix.into()),
            login_path: login_path.into(),
            landing_path: landing_path.into(),
        }
    }

    pub fn from_routes(routes: &RoutesConfig) -> Self {
        Self::new(
            routes.admin_prefix.clone(),
            routes.client_prefix.clone(),
            routes.login_path.clone(),
            routes.landing_path.clone(),
        )
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    /// Classify a request path by segment-aware prefix match.
    pub fn classify(&self, request_path: &str) -> RouteClass {
        let path = clean_path(request_path);

        if scoped_rest(path, &self.admin_prefix).is_some() {
            return RouteClass::AdminScoped;
        }

        if let Some(rest) = scoped_rest(path, &self.client_prefix) {
            let site_id = rest
                .strip_prefix('/')
                .and_then(|r| r.split('/').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            return RouteClass::ClientScoped { site_id };
        }

        RouteClass::Public
    }

    /// Decide whether `session` may load `request_path`.
    pub fn evaluate(&self, session: Option<&Session>, request_path: &str) -> AccessDecision {
        let class = self.classify(request_path);
        let decision = self.decide(session, &class);

        match &decision {
            AccessDecision::Allow => debug!("Access {} {:?}: allow", request_path, class),
            AccessDecision::Redirect(target) => info!(
                "Access {} {:?} for {}: redirect to {}",
                request_path,
                class,
                session.map(|s| s.user_id.as_str()).unwrap_or("<anonymous>"),
                target
            ),
        }

        decision
    }

    /// Decision for an already-classified route.
    pub fn decide(&self, session: Option<&Session>, class: &RouteClass) -> AccessDecision {
        match class {
            RouteClass::Public => AccessDecision::Allow,

            RouteClass::AdminScoped => match session {
                None => self.to_login(),
                Some(s) => match s.role {
                    Role::Admin => AccessDecision::Allow,
                    Role::Client | Role::Anonymous | Role::Unrecognized(_) => self.to_landing(),
                },
            },

            RouteClass::ClientScoped { site_id } => match session {
                None => self.to_login(),
                Some(s) => match &s.role {
                    Role::Admin => AccessDecision::Allow,
                    Role::Client => match site_id {
                        Some(site) if s.can_access_site(site) => AccessDecision::Allow,
                        _ => self.to_landing(),
                    },
                    // Unknown roles are denied on scoped routes, never waved through.
                    Role::Anonymous | Role::Unrecognized(_) => self.to_landing(),
                },
            },
        }
    }

    fn to_login(&self) -> AccessDecision {
        AccessDecision::Redirect(self.login_path.clone())
    }

    fn to_landing(&self) -> AccessDecision {
        AccessDecision::Redirect(self.landing_path.clone())
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    trimmed.to_string()
}

/// Remainder of `path` after `prefix` when the prefix ends on a segment
/// boundary: `/admin` and `/admin/x` match `/admin`, `/administrator` does not.
fn scoped_rest<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn session(role: Role, sites: &[&str]) -> Session {
        Session {
            user_id: "u-1".to_string(),
            email: "ops@example.com".to_string(),
            role,
            authorized_sites: sites.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            issued_at: 0,
            expires_at: i64::MAX,
        }
    }

    fn redirect(target: &str) -> AccessDecision {
        AccessDecision::Redirect(target.to_string())
    }

    #[test]
    fn anonymous_admin_route_goes_to_login() {
        let p = AccessPolicy::default();
        assert_eq!(p.evaluate(None, "/admin/overview"), redirect("/login"));
    }

    #[test]
    fn admin_may_open_admin_route() {
        let p = AccessPolicy::default();
        let s = session(Role::Admin, &[]);
        assert_eq!(p.evaluate(Some(&s), "/admin/overview"), AccessDecision::Allow);
    }

    #[test]
    fn client_may_open_authorized_site() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &["siteA"]);
        assert_eq!(
            p.evaluate(Some(&s), "/tools/siteA/dashboard"),
            AccessDecision::Allow
        );
    }

    #[test]
    fn client_is_sent_home_from_other_site() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/tools/siteB/dashboard"), redirect("/"));
    }

    #[test]
    fn client_without_sites_is_sent_home() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &[]);
        assert_eq!(p.evaluate(Some(&s), "/tools/siteA"), redirect("/"));
    }

    #[test]
    fn anonymous_public_route_is_allowed() {
        let p = AccessPolicy::default();
        assert_eq!(p.evaluate(None, "/"), AccessDecision::Allow);
    }

    #[test]
    fn client_on_admin_route_is_sent_home() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/admin"), redirect("/"));
    }

    #[test]
    fn admin_bypasses_site_restriction() {
        let p = AccessPolicy::default();
        let s = session(Role::Admin, &[]);
        assert_eq!(p.evaluate(Some(&s), "/tools/anything"), AccessDecision::Allow);
        assert_eq!(p.evaluate(Some(&s), "/tools"), AccessDecision::Allow);
    }

    #[test]
    fn missing_site_segment_is_a_denial() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/tools"), redirect("/"));
        assert_eq!(p.evaluate(Some(&s), "/tools/"), redirect("/"));
        assert_eq!(p.evaluate(Some(&s), "/tools//siteA"), redirect("/"));
    }

    #[test]
    fn unrecognized_role_is_denied_on_client_routes() {
        let p = AccessPolicy::default();
        let s = session(Role::Unrecognized("viewer".to_string()), &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/tools/siteA"), redirect("/"));
        assert_eq!(p.evaluate(Some(&s), "/admin"), redirect("/"));
    }

    #[test]
    fn anonymous_role_session_is_denied_not_sent_to_login() {
        let p = AccessPolicy::default();
        let s = session(Role::Anonymous, &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/tools/siteA"), redirect("/"));
    }

    #[test]
    fn prefix_match_respects_segment_boundary() {
        let p = AccessPolicy::default();
        assert_eq!(p.classify("/administrator"), RouteClass::Public);
        assert_eq!(p.classify("/toolshed/siteA"), RouteClass::Public);
        assert_eq!(p.classify("/admin"), RouteClass::AdminScoped);
    }

    #[test]
    fn classify_extracts_site_id() {
        let p = AccessPolicy::default();
        assert_eq!(
            p.classify("/tools/siteA/insar?window=30d"),
            RouteClass::ClientScoped {
                site_id: Some("siteA".to_string())
            }
        );
        assert_eq!(
            p.classify("/tools"),
            RouteClass::ClientScoped { site_id: None }
        );
    }

    #[test]
    fn site_ids_are_case_sensitive() {
        let p = AccessPolicy::default();
        let s = session(Role::Client, &["siteA"]);
        assert_eq!(p.evaluate(Some(&s), "/tools/SITEA"), redirect("/"));
    }

    #[test]
    fn custom_routes_are_honoured() {
        let p = AccessPolicy::new("/ops/", "/sites", "/signin", "/home");
        let s = session(Role::Client, &["pit-3"]);
        assert_eq!(p.evaluate(None, "/ops/users"), redirect("/signin"));
        assert_eq!(p.evaluate(Some(&s), "/ops"), redirect("/home"));
        assert_eq!(p.evaluate(Some(&s), "/sites/pit-3/radar"), AccessDecision::Allow);
        assert_eq!(p.evaluate(Some(&s), "/admin"), AccessDecision::Allow);
    }

    #[test]
    fn decision_accessors() {
        assert!(AccessDecision::Allow.is_allowed());
        assert_eq!(AccessDecision::Allow.redirect_target(), None);
        assert_eq!(redirect("/login").redirect_target(), Some("/login"));
        assert!(!redirect("/login").is_allowed());
    }
}
