use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

pub const MAX_SESSION_INACTIVITY_DURATION: Duration = Duration::days(30);

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Login state parked in the session across the authorize round-trip. One
/// per session; a new begin-login overwrites whatever was there before
/// (last write wins, concurrent logins in one session are unsupported).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub redirect_uri: String,
    pub next: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub pending_login: Option<PendingLogin>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_used_at.unwrap_or(self.created_at)
    }

    pub fn inactivity_duration(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_activity_at())
    }
}

/// Browser-session persistence seam; the id travels in the `sid` cookie.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self) -> Result<Session, SessionStoreError>;
    async fn get(&self, id: Uuid) -> Result<Session, SessionStoreError>;
    async fn set_pending_login(
        &self,
        id: Uuid,
        pending: PendingLogin,
    ) -> Result<(), SessionStoreError>;
    async fn attach_user(&self, id: Uuid, user_id: Uuid) -> Result<(), SessionStoreError>;
    async fn touch(&self, id: Uuid) -> Result<(), SessionStoreError>;
    async fn revoke(&self, id: Uuid) -> Result<(), SessionStoreError>;
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Option<Uuid>,
    pending_redirect_uri: Option<String>,
    pending_next: Option<String>,
    pending_state: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let pending_login = match (row.pending_redirect_uri, row.pending_state) {
            (Some(redirect_uri), Some(state)) => Some(PendingLogin {
                redirect_uri,
                next: row.pending_next.unwrap_or_else(|| "/".to_string()),
                state,
            }),
            _ => None,
        };

        Session {
            id: row.id,
            user_id: row.user_id,
            pending_login,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            revoked_at: row.revoked_at,
        }
    }
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, user_id, pending_redirect_uri, pending_next, pending_state, \
                               created_at, last_used_at, revoked_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self) -> Result<Session, SessionStoreError> {
        let query = format!("INSERT INTO sessions DEFAULT VALUES RETURNING {SESSION_COLUMNS}");
        sqlx::query_as::<_, SessionRow>(&query)
            .fetch_one(&self.pool)
            .await
            .map(Session::from)
            .map_err(SessionStoreError::from)
    }

    async fn get(&self, id: Uuid) -> Result<Session, SessionStoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Session::from)
            .ok_or(SessionStoreError::NotFound)
    }

    async fn set_pending_login(
        &self,
        id: Uuid,
        pending: PendingLogin,
    ) -> Result<(), SessionStoreError> {
        let result = sqlx::query(
            "UPDATE sessions \
             SET pending_redirect_uri = $2, pending_next = $3, pending_state = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&pending.redirect_uri)
        .bind(&pending.next)
        .bind(&pending.state)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::NotFound);
        }
        Ok(())
    }

    async fn attach_user(&self, id: Uuid, user_id: Uuid) -> Result<(), SessionStoreError> {
        let result = sqlx::query("UPDATE sessions SET user_id = $2 WHERE id = $1")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::NotFound);
        }
        Ok(())
    }

    async fn touch(&self, id: Uuid) -> Result<(), SessionStoreError> {
        sqlx::query(
            "UPDATE sessions SET last_used_at = NOW() \
             WHERE id = $1 AND (last_used_at IS NULL OR last_used_at < NOW())",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<(), SessionStoreError> {
        sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
