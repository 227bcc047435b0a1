//! Terminal client for the site monitoring dashboard.
//!
//! [`session_store::SessionStore`] owns the client's view of the session;
//! [`route_guard::RouteGuard`] keeps protected screens hidden until it
//! resolves. Both are driven by an [`identity::IdentityClient`].

pub mod app;
pub mod identity;
pub mod navigator;
pub mod route_guard;
pub mod session_store;
