use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    AppState, configure_user_scope,
    db::{
        sessions::{MAX_SESSION_INACTIVITY_DURATION, SessionStoreError},
        users::User,
    },
};

pub const SESSION_COOKIE: &str = "sid";

#[derive(Clone)]
pub struct RequestContext {
    pub user: User,
    pub session_id: Uuid,
}

pub fn session_cookie(session_id: Uuid, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

pub fn session_id_from_jar(jar: &CookieJar) -> Option<Uuid> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// Rejects requests without an authenticated, live session before any
/// handler logic runs. On success the handler sees a `RequestContext`.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(session_id) = session_id_from_jar(&jar) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let sessions = state.sessions();
    let session = match sessions.get(session_id).await {
        Ok(session) => session,
        Err(SessionStoreError::NotFound) => {
            warn!("session `{session_id}` not found");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(SessionStoreError::Database(error)) => {
            warn!(?error, "failed to load session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if session.revoked_at.is_some() {
        warn!("session `{session_id}` rejected (revoked)");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if session.inactivity_duration(Utc::now()) > MAX_SESSION_INACTIVITY_DURATION {
        warn!("session `{session_id}` expired due to inactivity; revoking");
        if let Err(error) = sessions.revoke(session.id).await {
            warn!(?error, "failed to revoke inactive session");
        }
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(user_id) = session.user_id else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let user: User = match state.users().find_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("user `{user_id}` missing");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(error) => {
            warn!(?error, "failed to load user");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    configure_user_scope(user.id, user.display_name.as_deref(), Some(user.email.as_str()));

    req.extensions_mut().insert(RequestContext {
        user,
        session_id: session.id,
    });

    if let Err(error) = sessions.touch(session.id).await {
        warn!(?error, "failed to update session last-used timestamp");
    }

    next.run(req).await
}
