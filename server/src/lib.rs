//! Session-aware access gateway for the site monitoring dashboard.
//!
//! Request pipeline, outermost first:
//!
//! ```text
//! TimeoutLayer -> AccessGuardLayer -> RouterService -> handler
//! ```
//!
//! The guard resolves the session from cookies, evaluates the route policy
//! and relays any cookie writes back onto the response.

pub mod cookies;
pub mod handlers;
pub mod identity;
pub mod tower_middle;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use shared::config::LiveConfig;
use tower::{Service, ServiceBuilder};
use tracing::error;

use crate::handlers::http::Router;
use crate::handlers::http::utils::{deliver_error_json, empty};
use crate::identity::JwtIdentityProvider;
use crate::tower_middle::{AccessGuard, AccessGuardLayer, TimeoutLayer, TimeoutService};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body as seen by handlers. Erased so the same stack serves hyper's
/// `Incoming` in production and in-memory bodies in tests.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

pub fn request_body<B>(body: B) -> RequestBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// Shared state passed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: LiveConfig,
    pub identity: Arc<JwtIdentityProvider>,
}

impl AppState {
    pub fn new(config: LiveConfig, identity: Arc<JwtIdentityProvider>) -> Self {
        Self { config, identity }
    }
}

/// Adapts [`Router`] to a tower `Service`. Handler errors become a JSON 500
/// here so the layers above only ever see responses.
#[derive(Clone)]
pub struct RouterService {
    router: Arc<Router>,
    state: AppState,
}

impl RouterService {
    pub fn new(router: Router, state: AppState) -> Self {
        Self {
            router: Arc::new(router),
            state,
        }
    }
}

impl Service<Request<RequestBody>> for RouterService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        let router = self.router.clone();
        let state = self.state.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            match router.route(req, state).await {
                Ok(res) => Ok(res),
                Err(e) => {
                    error!("Handler for {} failed: {:#}", path, e);
                    Ok(internal_error())
                }
            }
        })
    }
}

fn internal_error() -> Response<ResponseBody> {
    deliver_error_json(
        "INTERNAL_ERROR",
        "An internal error occurred",
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .unwrap_or_else(|_| {
        let mut res = Response::new(empty());
        *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        res
    })
}

pub type AppService = TimeoutService<AccessGuard<RouterService, JwtIdentityProvider>>;

/// Assemble the full middleware stack around `router`.
pub fn app_service(state: AppState, router: Router, request_timeout: Duration) -> AppService {
    let guard = AccessGuardLayer::new(state.identity.clone(), state.config.clone());

    ServiceBuilder::new()
        .layer(TimeoutLayer::new(request_timeout))
        .layer(guard)
        .service(RouterService::new(router, state))
}
