use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::{
    AppState,
    auth::{LoginError, RequestContext, session_cookie, session_id_from_jar},
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/{provider}/login", get(begin_login))
        .route("/auth/{provider}/callback", post(complete_login))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/auth/logout", post(logout))
}

#[derive(Debug, Deserialize)]
pub struct BeginLoginQuery {
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    next: Option<String>,
}

pub async fn begin_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<BeginLoginQuery>,
    jar: CookieJar,
) -> Response {
    // Unknown providers fail before a session row or any external call.
    if state.providers().get(&provider).is_none() {
        return login_error_response(LoginError::UnsupportedProvider(provider));
    }

    let sessions = state.sessions();
    let existing = match session_id_from_jar(&jar) {
        Some(id) => sessions.get(id).await.ok().map(|session| session.id),
        None => None,
    };
    let session_id = match existing {
        Some(id) => id,
        None => match sessions.create().await {
            Ok(session) => session.id,
            Err(error) => {
                warn!(?error, "failed to create session");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
    };

    match state
        .login()
        .begin_login(session_id, &provider, query.redirect_uri, query.next)
        .await
    {
        Ok(url) => {
            let jar = jar.add(session_cookie(session_id, state.cookie_secure()));
            (jar, Redirect::temporary(url.as_str())).into_response()
        }
        Err(error) => login_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginSuccessResponse {
    message: &'static str,
    next: String,
    token: String,
    refresh_token: Option<String>,
}

pub async fn complete_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
    Json(payload): Json<CallbackPayload>,
) -> Response {
    if state.providers().get(&provider).is_none() {
        return login_error_response(LoginError::UnsupportedProvider(provider));
    }

    let Some(session_id) = session_id_from_jar(&jar) else {
        warn!("login callback without a session cookie");
        return login_error_response(LoginError::PendingLoginMissing);
    };

    match state
        .login()
        .complete_login(
            session_id,
            &provider,
            payload.code.as_deref(),
            payload.state.as_deref(),
        )
        .await
    {
        Ok(completed) => (
            StatusCode::OK,
            Json(LoginSuccessResponse {
                message: "login success",
                next: completed.next,
                token: completed.tokens.access_token.expose_secret().to_string(),
                refresh_token: completed
                    .tokens
                    .refresh_token
                    .as_ref()
                    .map(|token| token.expose_secret().to_string()),
            }),
        )
            .into_response(),
        Err(error) => login_error_response(error),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    match state.sessions().revoke(ctx.session_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "message": "logout success" }))).into_response(),
        Err(error) => {
            warn!(?error, session_id = %ctx.session_id, "failed to revoke session");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn login_error_response(error: LoginError) -> Response {
    match &error {
        LoginError::Provider(err) => warn!(?err, "provider error during login"),
        LoginError::Identity(err) => warn!(?err, "identity error during login"),
        LoginError::User(err) => warn!(?err, "user store error during login"),
        LoginError::Session(err) => warn!(?err, "session error during login"),
        LoginError::StateMismatch | LoginError::MissingCode | LoginError::MissingIdentity => {
            warn!(%error, "login callback rejected")
        }
        _ => {}
    }

    let message = match error {
        LoginError::UnsupportedProvider(_) => "unsupported provider",
        _ => "login failed",
    };

    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}
