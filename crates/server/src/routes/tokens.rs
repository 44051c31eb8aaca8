use axum::{
    Json, Router,
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::{
    AppState,
    auth::{LoginError, RequestContext},
};

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/auth/refresh", post(refresh_token))
}

#[derive(Debug, Deserialize)]
pub struct TokenRefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenRefreshResponse {
    message: &'static str,
    next: Option<String>,
    token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenRefreshError {
    #[error("No refresh token available")]
    MissingToken,
    #[error(transparent)]
    Login(#[from] LoginError),
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<TokenRefreshRequest>,
) -> Result<Response, TokenRefreshError> {
    // Checked before anything else so no provider call can happen without a
    // token to trade in.
    let refresh_token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .ok_or(TokenRefreshError::MissingToken)?;

    let refreshed = state
        .login()
        .refresh(&ctx.user, ctx.session_id, &refresh_token)
        .await?;

    Ok(Json(TokenRefreshResponse {
        message: "refresh success",
        next: refreshed.next,
        token: refreshed.tokens.access_token.expose_secret().to_string(),
        refresh_token: refreshed
            .tokens
            .refresh_token
            .as_ref()
            .map(|token| token.expose_secret().to_string()),
    })
    .into_response())
}

impl IntoResponse for TokenRefreshError {
    fn into_response(self) -> Response {
        match self {
            TokenRefreshError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "No refresh token available" })),
            )
                .into_response(),
            TokenRefreshError::Login(error) => {
                match &error {
                    LoginError::Provider(err) => {
                        warn!(?err, "provider error during token refresh")
                    }
                    LoginError::Session(err) => warn!(?err, "session error during token refresh"),
                    other => warn!(%other, "token refresh failed"),
                }
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "message": "Refresh failed", "error": error.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
