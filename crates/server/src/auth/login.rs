use std::sync::Arc;

use anyhow::Error as AnyhowError;
use rand::{Rng, distr::Alphanumeric};
use thiserror::Error;
use tracing::info;
use url::Url;
use uuid::Uuid;

use super::{
    identity::IdentityError,
    provider::{ProviderRegistry, TokenSet},
};
use crate::{
    configure_user_scope,
    db::{
        sessions::{PendingLogin, SessionStore, SessionStoreError},
        users::{NewUser, User, UserStore, UserStoreError},
    },
};

const STATE_LENGTH: usize = 48;
const DEFAULT_NEXT: &str = "/";

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),
    #[error("no pending login stored in session")]
    PendingLoginMissing,
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("authorization code missing from callback")]
    MissingCode,
    #[error("provider issued no identity token")]
    MissingIdentity,
    #[error(transparent)]
    Provider(#[from] AnyhowError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    User(#[from] UserStoreError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
}

#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub user: User,
    pub next: String,
    pub tokens: TokenSet,
}

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub next: Option<String>,
    pub tokens: TokenSet,
}

/// Drives the authorization-code round-trip: hands the browser to the
/// provider, completes the code exchange, resolves the local account and
/// marks the session authenticated.
pub struct LoginService {
    providers: Arc<ProviderRegistry>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    public_base_url: String,
}

impl LoginService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        public_base_url: String,
    ) -> Self {
        let trimmed = public_base_url.trim_end_matches('/').to_string();
        Self {
            providers,
            sessions,
            users,
            public_base_url: trimmed,
        }
    }

    pub fn providers(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.providers)
    }

    /// Stores the pending login in the caller's session (overwriting any
    /// earlier one) and returns the provider authorize URL to redirect to.
    pub async fn begin_login(
        &self,
        session_id: Uuid,
        provider_name: &str,
        redirect_uri: Option<String>,
        next: Option<String>,
    ) -> Result<Url, LoginError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| LoginError::UnsupportedProvider(provider_name.to_string()))?;

        let redirect_uri = match redirect_uri.filter(|value| !value.is_empty()) {
            Some(value) => value,
            None => format!(
                "{}/v1/auth/{}/callback",
                self.public_base_url,
                provider.name()
            ),
        };
        let next = next
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_NEXT.to_string());
        let state = generate_state();

        self.sessions
            .set_pending_login(
                session_id,
                PendingLogin {
                    redirect_uri: redirect_uri.clone(),
                    next,
                    state: state.clone(),
                },
            )
            .await?;

        provider
            .authorize_url(&redirect_uri, &state)
            .map_err(LoginError::Provider)
    }

    /// Exchanges the authorization code using the redirect URI stored at
    /// begin-login, resolves the user by email (get-or-create) and attaches
    /// the user to the session.
    pub async fn complete_login(
        &self,
        session_id: Uuid,
        provider_name: &str,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<CompletedLogin, LoginError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| LoginError::UnsupportedProvider(provider_name.to_string()))?;

        let session = self.sessions.get(session_id).await?;
        let pending = session
            .pending_login
            .ok_or(LoginError::PendingLoginMissing)?;

        if state != Some(pending.state.as_str()) {
            return Err(LoginError::StateMismatch);
        }
        let code = code.ok_or(LoginError::MissingCode)?;

        let tokens = provider
            .exchange_code(code, &pending.redirect_uri)
            .await
            .map_err(LoginError::Provider)?;

        let claims = provider
            .identity_claims(&tokens)?
            .ok_or(LoginError::MissingIdentity)?;

        let user = match self.users.find_by_email(&claims.email).await? {
            Some(existing) => existing,
            None => {
                let user = self
                    .users
                    .create(NewUser {
                        email: claims.email.clone(),
                        display_name: Some(claims.display_name.clone()),
                        oauth_provider: provider.name().to_string(),
                    })
                    .await?;
                info!(user_id = %user.id, provider = provider.name(), "created user on first login");
                user
            }
        };

        self.sessions.attach_user(session_id, user.id).await?;

        configure_user_scope(user.id, user.display_name.as_deref(), Some(&user.email));

        Ok(CompletedLogin {
            user,
            next: pending.next,
            tokens,
        })
    }

    /// Trades a refresh token for a fresh access/refresh pair at the token
    /// endpoint of the provider the user originally logged in with.
    pub async fn refresh(
        &self,
        user: &User,
        session_id: Uuid,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, LoginError> {
        let provider = self
            .providers
            .get(&user.oauth_provider)
            .ok_or_else(|| LoginError::UnsupportedProvider(user.oauth_provider.clone()))?;

        let tokens = provider
            .refresh_token(refresh_token)
            .await
            .map_err(LoginError::Provider)?;

        let session = self.sessions.get(session_id).await?;
        let next = session.pending_login.map(|pending| pending.next);

        Ok(RefreshedTokens { next, tokens })
    }
}

fn generate_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_is_alphanumeric_and_fixed_length() {
        let state = generate_state();
        assert_eq!(state.len(), STATE_LENGTH);
        assert!(state.chars().all(|ch| ch.is_ascii_alphanumeric()));
    }

    #[test]
    fn states_are_unique_per_login() {
        assert_ne!(generate_state(), generate_state());
    }
}
