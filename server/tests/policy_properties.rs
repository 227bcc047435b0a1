//! Property tests for route classification and access decisions.

use std::collections::BTreeSet;

use proptest::prelude::*;
use shared::policy::AccessPolicy;
use shared::types::{AccessDecision, Role, Session};

fn session(role: Role, sites: &[String]) -> Session {
    Session {
        user_id: "u".to_string(),
        email: "u@example.com".to_string(),
        role,
        authorized_sites: sites.iter().cloned().collect::<BTreeSet<_>>(),
        issued_at: 0,
        expires_at: i64::MAX,
    }
}

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,12}"
}

fn tail() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..4).prop_map(|segs| {
        segs.iter().map(|s| format!("/{s}")).collect::<String>()
    })
}

proptest! {
    #[test]
    fn admins_reach_every_scoped_path(site in segment(), rest in tail(), admin in any::<bool>()) {
        let policy = AccessPolicy::default();
        let path = if admin {
            format!("/admin{rest}")
        } else {
            format!("/tools/{site}{rest}")
        };
        let s = session(Role::Admin, &[]);
        prop_assert_eq!(policy.evaluate(Some(&s), &path), AccessDecision::Allow);
    }

    #[test]
    fn clients_reach_exactly_their_sites(
        site in segment(),
        granted in prop::collection::vec(segment(), 0..4),
        rest in tail(),
    ) {
        let policy = AccessPolicy::default();
        let s = session(Role::Client, &granted);
        let path = format!("/tools/{site}{rest}");
        let decision = policy.evaluate(Some(&s), &path);

        if granted.contains(&site) {
            prop_assert_eq!(decision, AccessDecision::Allow);
        } else {
            prop_assert_eq!(decision, AccessDecision::Redirect("/".to_string()));
        }
    }

    #[test]
    fn clients_never_reach_admin(rest in tail(), granted in prop::collection::vec(segment(), 0..4)) {
        let policy = AccessPolicy::default();
        let s = session(Role::Client, &granted);
        prop_assert_eq!(
            policy.evaluate(Some(&s), &format!("/admin{rest}")),
            AccessDecision::Redirect("/".to_string())
        );
    }

    #[test]
    fn anonymous_scoped_requests_go_to_login(site in segment(), rest in tail()) {
        let policy = AccessPolicy::default();
        for path in [format!("/admin{rest}"), format!("/tools/{site}{rest}")] {
            prop_assert_eq!(
                policy.evaluate(None, &path),
                AccessDecision::Redirect("/login".to_string())
            );
        }
    }

    #[test]
    fn paths_outside_prefixes_are_public(first in "[b-su-z][a-z0-9]{0,8}", rest in tail()) {
        // First segment never starts with `a` or `t`, so it can't be a prefix.
        let policy = AccessPolicy::default();
        let path = format!("/{first}{rest}");
        prop_assert_eq!(policy.evaluate(None, &path), AccessDecision::Allow);
    }

    #[test]
    fn query_and_fragment_do_not_change_the_decision(
        site in segment(),
        query in "[a-z=&]{0,10}",
        granted in prop::collection::vec(segment(), 0..3),
    ) {
        let policy = AccessPolicy::default();
        let s = session(Role::Client, &granted);
        let plain = format!("/tools/{site}/dashboard");
        let decorated = format!("{plain}?{query}#top");
        prop_assert_eq!(
            policy.evaluate(Some(&s), &plain),
            policy.evaluate(Some(&s), &decorated)
        );
    }

    #[test]
    fn evaluation_is_deterministic(site in segment(), rest in tail(), admin in any::<bool>()) {
        let policy = AccessPolicy::default();
        let s = session(if admin { Role::Admin } else { Role::Client }, &[site.clone()]);
        let path = format!("/tools/{site}{rest}");
        let first = policy.evaluate(Some(&s), &path);
        prop_assert_eq!(first.clone(), policy.evaluate(Some(&s), &path));
    }
}
