use std::convert::Infallible;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response, StatusCode};
use shared::types::{LoginData, LoginError};
use tracing::{info, warn};

use crate::cookies::CookieTransaction;
use crate::handlers::http::utils;
use crate::identity::{IdentityError, IdentityProvider};
use crate::{AppState, RequestBody};

type CollectFuture = std::pin::Pin<
    Box<
        dyn std::future::Future<Output = Result<http_body_util::Collected<Bytes>, crate::BoxError>>
            + Send,
    >,
>;

/// Largest credential body accepted.
const MAX_LOGIN_BODY: usize = 16 * 1024;

/// `POST /api/auth/login`: exchange credentials for session cookies.
pub async fn handle_login(
    req: Request<RequestBody>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    info!("Processing login request");

    let mut cookies = CookieTransaction::from_headers(req.headers());

    let login_data = match parse_login(req).await {
        Ok(data) => data,
        Err(login_error) => {
            warn!("Login parsing failed: {}", login_error.to_code());
            return error_response(&login_error, StatusCode::BAD_REQUEST);
        }
    };

    if let Err(login_error) = login_data.validate() {
        warn!("Login validation failed: {}", login_error.to_code());
        return error_response(&login_error, StatusCode::BAD_REQUEST);
    }

    match state
        .identity
        .sign_in(&login_data.email, &login_data.password, &mut cookies)
        .await
    {
        Ok(session) => {
            let mut res = utils::deliver_success_json(Some(&session))?;
            cookies.attach(&mut res);
            Ok(res)
        }
        Err(IdentityError::InvalidCredentials) => {
            error_response(&LoginError::InvalidCredentials, StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            warn!("Sign-in failed: {}", e);
            error_response(&LoginError::InternalError, StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Accepts `application/x-www-form-urlencoded` or JSON.
async fn parse_login(req: Request<RequestBody>) -> Result<LoginData, LoginError> {
    let is_form = utils::media_type_is(
        req.headers(),
        "content-type",
        "application/x-www-form-urlencoded",
    );

    // Over-limit bodies fail mid-stream instead of being buffered whole.
    // Boxed so `Send` is proven with concrete types; rustc's higher-ranked
    // inference otherwise rejects `Limited`'s error bound inside the future.
    let collect: CollectFuture = Box::pin(Limited::new(req.into_body(), MAX_LOGIN_BODY).collect());
    let body = collect
        .await
        .map_err(|_| LoginError::MalformedBody)?
        .to_bytes();

    if is_form {
        let mut email = None;
        let mut password = None;
        for (key, value) in form_urlencoded::parse(&body) {
            match key.as_ref() {
                "email" | "username" => email = Some(value.into_owned()),
                "password" => password = Some(value.into_owned()),
                _ => {}
            }
        }
        return Ok(LoginData {
            email: email.ok_or_else(|| LoginError::MissingField("email".to_string()))?,
            password: password.ok_or_else(|| LoginError::MissingField("password".to_string()))?,
        });
    }

    serde_json::from_slice(&body).map_err(|_| LoginError::MalformedBody)
}

fn error_response(
    error: &LoginError,
    status: StatusCode,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    utils::deliver_error_json(error.to_code(), &error.to_message(), status)
}
