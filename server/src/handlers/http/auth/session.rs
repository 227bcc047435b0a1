use std::convert::Infallible;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use tracing::warn;

use crate::cookies::CookieTransaction;
use crate::handlers::http::utils;
use crate::identity::IdentityProvider;
use crate::{AppState, RequestBody};

/// `GET /api/auth/session`: the current session or `null`, refreshing
/// tokens on the way when the access token has lapsed.
pub async fn handle_get_session(
    req: Request<RequestBody>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let mut cookies = CookieTransaction::from_headers(req.headers());

    let session = match state.identity.resolve(&mut cookies).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            None
        }
    };

    let mut res = utils::deliver_success_json(session.as_ref())?;
    cookies.attach(&mut res);
    Ok(res)
}
