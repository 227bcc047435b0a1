use std::convert::Infallible;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use tracing::{info, warn};

use crate::cookies::{CookieOptions, CookieTransaction};
use crate::handlers::http::utils;
use crate::identity::IdentityProvider;
use crate::{AppState, RequestBody};

/// `POST /api/auth/logout`
///
/// Always succeeds from the browser's point of view: if the provider fails to
/// revoke, the auth cookies are still cleared.
pub async fn handle_logout(
    req: Request<RequestBody>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let mut cookies = CookieTransaction::from_headers(req.headers());

    if let Err(e) = state.identity.sign_out(&mut cookies).await {
        warn!("Provider sign-out failed, clearing cookies anyway: {}", e);
    }

    let (login_path, access, refresh, secure) = {
        let cfg = state.config.read().await;
        (
            cfg.routes.login_path.clone(),
            cfg.auth.access_cookie.clone(),
            cfg.auth.refresh_cookie.clone(),
            cfg.auth.secure_cookies,
        )
    };
    let clear = CookieOptions::default().secure(secure);
    cookies.remove(&access, clear.clone());
    cookies.remove(&refresh, clear);

    info!("User logged out");

    // Browser form posts land on the sign-in page; API callers get JSON.
    let mut res = if utils::accepts_content_type(req.headers(), "text/html") {
        utils::deliver_redirect(&login_path)?
    } else {
        utils::deliver_success_json::<()>(None)?
    };
    cookies.attach(&mut res);
    Ok(res)
}
