use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::header::{CACHE_CONTROL, HeaderValue, LOCATION};
use hyper::{Request, Response, StatusCode};
use shared::config::LiveConfig;
use shared::policy::{AccessPolicy, ExclusionSet};
use shared::types::{AccessDecision, Session};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::cookies::CookieTransaction;
use crate::handlers::http::utils::empty;
use crate::identity::IdentityProvider;

/// Session the guard resolved for this request, inserted into the request
/// extensions before the inner service runs. `None` means anonymous on a
/// public route.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Option<Session>);

/// Tower layer that resolves the session from cookies and applies the access
/// policy before any handler sees the request.
pub struct AccessGuardLayer<P> {
    provider: Arc<P>,
    config: LiveConfig,
}

impl<P> Clone for AccessGuardLayer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            config: self.config.clone(),
        }
    }
}

impl<P> AccessGuardLayer<P> {
    pub fn new(provider: Arc<P>, config: LiveConfig) -> Self {
        Self { provider, config }
    }
}

impl<S, P> Layer<S> for AccessGuardLayer<P> {
    type Service = AccessGuard<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessGuard {
            inner,
            provider: self.provider.clone(),
            config: self.config.clone(),
        }
    }
}

pub struct AccessGuard<S, P> {
    inner: S,
    provider: Arc<P>,
    config: LiveConfig,
}

impl<S: Clone, P> Clone for AccessGuard<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            provider: self.provider.clone(),
            config: self.config.clone(),
        }
    }
}

/// Route table and limits copied out of the live config for one request.
struct GuardSettings {
    policy: AccessPolicy,
    exclusions: ExclusionSet,
    resolve_timeout: Duration,
}

impl GuardSettings {
    async fn load(config: &LiveConfig) -> Self {
        let cfg = config.read().await;
        Self {
            policy: AccessPolicy::from_routes(&cfg.routes),
            exclusions: ExclusionSet::new(cfg.routes.exclude.iter().cloned()),
            resolve_timeout: Duration::from_millis(cfg.auth.resolve_timeout_ms),
        }
    }
}

impl<S, P, ReqBody> Service<Request<ReqBody>> for AccessGuard<S, P>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody<Bytes, Infallible>>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    P: IdentityProvider,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let provider = self.provider.clone();
        let config = self.config.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let settings = GuardSettings::load(&config).await;
            let path = req.uri().path().to_string();

            if let Some(pattern) = settings.exclusions.matching(&path) {
                debug!("{} bypasses access guard ({})", path, pattern);
                let mut res = inner.call(req).await?;
                if let Some(cookies) = CookieTransaction::take_attached(&mut res) {
                    cookies.apply(res.headers_mut());
                }
                return Ok(res);
            }

            // Cookie refresh must finish before the decision: rotation can
            // change the resolved role.
            let mut cookies = CookieTransaction::from_headers(req.headers());
            let session =
                resolve_session(provider.as_ref(), &mut cookies, settings.resolve_timeout).await;

            match settings.policy.evaluate(session.as_ref(), &path) {
                AccessDecision::Redirect(target) => {
                    let mut res = redirect(&target);
                    cookies.apply(res.headers_mut());
                    Ok(res)
                }
                AccessDecision::Allow => {
                    cookies.write_request_headers(req.headers_mut());
                    req.extensions_mut().insert(CurrentSession(session));

                    let mut res = inner.call(req).await?;
                    if let Some(later) = CookieTransaction::take_attached(&mut res) {
                        cookies.merge(later);
                    }
                    cookies.apply(res.headers_mut());
                    Ok(res)
                }
            }
        })
    }
}

async fn resolve_session<P: IdentityProvider>(
    provider: &P,
    cookies: &mut CookieTransaction,
    limit: Duration,
) -> Option<Session> {
    match tokio::time::timeout(limit, provider.resolve(cookies)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            warn!("Session resolution failed, treating as anonymous: {}", e);
            None
        }
        Err(_) => {
            warn!("Session resolution timed out after {:?}", limit);
            None
        }
    }
}

fn redirect(target: &str) -> Response<BoxBody<Bytes, Infallible>> {
    let mut res = Response::new(empty());
    *res.status_mut() = StatusCode::TEMPORARY_REDIRECT;

    let location = HeaderValue::from_str(target).unwrap_or_else(|_| {
        warn!("Redirect target {:?} is not a valid header; using /", target);
        HeaderValue::from_static("/")
    });
    res.headers_mut().insert(LOCATION, location);
    res.headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieOptions;
    use crate::identity::IdentityError;
    use shared::config::parse_config;
    use shared::types::Role;
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    /// Provider with a fixed behaviour per test.
    enum Stub {
        Slow,
        Broken,
        Admin,
        /// Writes a cookie while resolving, as a token refresh would.
        Refreshing,
    }

    fn admin_session() -> Session {
        Session {
            user_id: "u-admin".to_string(),
            email: "admin@example.com".to_string(),
            role: Role::Admin,
            authorized_sites: BTreeSet::new(),
            issued_at: 0,
            expires_at: i64::MAX,
        }
    }

    impl IdentityProvider for Stub {
        async fn resolve(
            &self,
            cookies: &mut CookieTransaction,
        ) -> Result<Option<Session>, IdentityError> {
            match self {
                Stub::Slow => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Some(admin_session()))
                }
                Stub::Broken => Err(IdentityError::PasswordHash("boom".to_string())),
                Stub::Admin => Ok(Some(admin_session())),
                Stub::Refreshing => {
                    cookies.set("dash-access-token", "fresh", CookieOptions::default());
                    Ok(Some(admin_session()))
                }
            }
        }

        async fn sign_in(
            &self,
            _email: &str,
            _password: &str,
            _cookies: &mut CookieTransaction,
        ) -> Result<Session, IdentityError> {
            Err(IdentityError::InvalidCredentials)
        }

        async fn sign_out(&self, _cookies: &mut CookieTransaction) -> Result<(), IdentityError> {
            Ok(())
        }
    }

    fn config() -> LiveConfig {
        LiveConfig::new(
            parse_config(
                r#"
[server]
bind = "127.0.0.1"

[paths]
web_dir = "web"

[auth]
jwt_secret = "guard-test-secret-guard-test-secret!"
resolve_timeout_ms = 50
"#,
            )
            .unwrap(),
        )
    }

    /// Reports the Cookie header it received and whether a session was
    /// attached, as response headers.
    async fn echo(req: Request<()>) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible> {
        let mut res = Response::new(empty());
        if let Some(cookie) = req.headers().get(hyper::header::COOKIE) {
            res.headers_mut().insert("x-seen-cookie", cookie.clone());
        }
        let signed_in = req
            .extensions()
            .get::<CurrentSession>()
            .is_some_and(|s| s.0.is_some());
        res.headers_mut().insert(
            "x-signed-in",
            HeaderValue::from_static(if signed_in { "yes" } else { "no" }),
        );
        Ok(res)
    }

    async fn call(
        stub: Stub,
        path: &str,
        cookie: Option<&str>,
    ) -> Response<BoxBody<Bytes, Infallible>> {
        let layer = AccessGuardLayer::new(Arc::new(stub), config());
        let svc = layer.layer(tower::service_fn(echo));
        let mut req = Request::builder().uri(path);
        if let Some(c) = cookie {
            req = req.header(hyper::header::COOKIE, c);
        }
        svc.oneshot(req.body(()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn slow_provider_counts_as_anonymous() {
        let res = call(Stub::Slow, "/admin/overview", None).await;
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers().get(LOCATION).unwrap(), "/login");
    }

    #[tokio::test]
    async fn provider_error_counts_as_anonymous() {
        let res = call(Stub::Broken, "/tools/siteA", None).await;
        assert_eq!(res.headers().get(LOCATION).unwrap(), "/login");
        assert_eq!(res.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    }

    #[tokio::test]
    async fn allowed_request_carries_session() {
        let res = call(Stub::Admin, "/admin/overview", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("x-signed-in").unwrap(), "yes");
    }

    #[tokio::test]
    async fn excluded_paths_skip_resolution() {
        // The slow stub would time out if the guard tried to resolve.
        let res = call(Stub::Slow, "/api/auth/session", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.extensions().get::<CurrentSession>().is_none());
        assert_eq!(res.headers().get("x-signed-in").unwrap(), "no");
    }

    #[tokio::test]
    async fn refreshed_cookie_reaches_handler_and_browser() {
        let res = call(
            Stub::Refreshing,
            "/admin/overview",
            Some("dash-access-token=stale; theme=dark"),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("x-seen-cookie").unwrap(),
            "dash-access-token=fresh; theme=dark"
        );
        let set: Vec<_> = res
            .headers()
            .get_all(hyper::header::SET_COOKIE)
            .iter()
            .collect();
        assert_eq!(set.len(), 1);
        assert!(set[0].to_str().unwrap().starts_with("dash-access-token=fresh;"));
    }

    #[test]
    fn invalid_redirect_target_falls_back_to_root() {
        let res = redirect("/bad\nheader");
        assert_eq!(res.headers().get(LOCATION).unwrap(), "/");
    }
}
