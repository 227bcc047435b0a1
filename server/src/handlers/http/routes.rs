use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Method, Request, Response, StatusCode};
use shared::policy::{AccessPolicy, path_matches};
use shared::types::RouteClass;
use tracing::debug;

use crate::handlers::http::auth;
use crate::handlers::http::utils::*;
use crate::{AppState, RequestBody};

// ---------------------------------------------------------------------------
// Handler type alias
// ---------------------------------------------------------------------------
//
// Access control happens in the guard layer in front of the router, so every
// handler has the same shape: (req, state). Handlers that need the resolved
// session read `CurrentSession` from the request extensions.

type RouteHandler = Box<
    dyn Fn(
            Request<RequestBody>,
            AppState,
        )
            -> Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send>>
        + Send
        + Sync,
>;

struct Route {
    method: Method,
    path: String,
    handler: RouteHandler,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    routes: Vec<Route>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes_count", &self.routes.len())
            .finish()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn get<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<RequestBody>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.add(Method::GET, path, handler)
    }

    pub fn post<F, Fut>(self, path: &str, handler: F) -> Self
    where
        F: Fn(Request<RequestBody>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.add(Method::POST, path, handler)
    }

    fn add<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request<RequestBody>, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<BoxBody<Bytes, Infallible>>>> + Send + 'static,
    {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            handler: Box::new(move |req, state| Box::pin(handler(req, state))),
        });
        self
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    pub async fn route(
        &self,
        req: Request<RequestBody>,
        state: AppState,
    ) -> Result<Response<BoxBody<Bytes, Infallible>>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        for route in &self.routes {
            if route.method == method && path_matches(&route.path, &path) {
                return (route.handler)(req, state).await;
            }
        }

        // No registered route matched; try the page/static fallback for GET.
        if method == Method::GET || method == Method::HEAD {
            if let Some(res) = try_serve_page(&path, &state).await? {
                return Ok(res);
            }
        }

        debug!("No route for {} {}", method, path);
        deliver_error_json("NOT_FOUND", "Endpoint not found", StatusCode::NOT_FOUND)
            .context("Failed to deliver 404 response")
    }
}

// ---------------------------------------------------------------------------
// Page fallback
// ---------------------------------------------------------------------------

/// Map a path onto the dashboard's HTML shells and assets. By the time a
/// request gets here the guard has already allowed it.
async fn try_serve_page(
    path: &str,
    state: &AppState,
) -> Result<Option<Response<BoxBody<Bytes, Infallible>>>> {
    let (web_dir, policy) = {
        let cfg = state.config.read().await;
        (
            cfg.paths.web_dir.trim_end_matches('/').to_string(),
            AccessPolicy::from_routes(&cfg.routes),
        )
    };

    if path == policy.login_path() {
        return page(&web_dir, "login.html").await.map(Some);
    }
    if path == policy.landing_path() || path == "/index.html" {
        return page(&web_dir, "index.html").await.map(Some);
    }

    if path.starts_with("/static/") || path == "/favicon.ico" {
        let Some(file_path) = safe_join(&web_dir, path) else {
            return Ok(None);
        };
        return deliver_page_with_status(&file_path, StatusCode::OK, CacheStrategy::Yes)
            .await
            .context("Failed to deliver static file")
            .map(Some);
    }

    match policy.classify(path) {
        RouteClass::AdminScoped => page(&web_dir, "admin.html").await.map(Some),
        RouteClass::ClientScoped { .. } => page(&web_dir, "site.html").await.map(Some),
        RouteClass::Public => Ok(None),
    }
}

async fn page(web_dir: &str, file: &str) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let file_path = format!("{}/{}", web_dir, file);
    deliver_html_page(&file_path)
        .await
        .with_context(|| format!("Failed to deliver {}", file))
}

// ---------------------------------------------------------------------------
// Application router
// ---------------------------------------------------------------------------

pub fn build_router() -> Router {
    Router::new()
        .get("/health", |_req, _state| async move {
            deliver_serialized_json(
                &serde_json::json!({"status": "success", "health": "ok"}),
                StatusCode::OK,
            )
        })
        .post("/api/auth/login", |req, state| async move {
            auth::handle_login(req, state).await.context("Login failed")
        })
        .post("/api/auth/logout", |req, state| async move {
            auth::handle_logout(req, state).await.context("Logout failed")
        })
        .get("/api/auth/session", |req, state| async move {
            auth::handle_get_session(req, state)
                .await
                .context("Session lookup failed")
        })
}
