use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::identity::{self, IdentityClaims, IdentityError};
use crate::config::ProviderConfig;

const USER_AGENT: &str = "AuthServer/1.0";

// Authorization codes are single-use and refresh grants must not be repeated
// behind the caller's back, so token requests get one bounded attempt.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens issued by a provider for one grant. Never persisted server-side;
/// handed straight back to the client.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub id_token: Option<SecretString>,
}

#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    fn name(&self) -> &str;
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url>;
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet>;
    fn identity_claims(&self, tokens: &TokenSet) -> Result<Option<IdentityClaims>, IdentityError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AuthorizationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P>(&mut self, provider: P)
    where
        P: AuthorizationProvider + 'static,
    {
        let key = provider.name().to_lowercase();
        self.providers.insert(key, Arc::new(provider));
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn AuthorizationProvider>> {
        let key = provider.to_lowercase();
        self.providers.get(&key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Config-driven OAuth2 client used for every registered provider. Endpoint
/// URLs and credentials come from `ProviderConfig`; nothing is hardcoded per
/// provider except the identity-claim rules in `identity`.
pub struct OAuthClient {
    client: Client,
    name: String,
    client_id: String,
    client_secret: SecretString,
    authorize_endpoint: Url,
    token_endpoint: Url,
}

impl OAuthClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            name: config.name,
            client_id: config.client_id,
            client_secret: config.client_secret,
            authorize_endpoint: config.authorize_url,
            token_endpoint: config.token_url,
        })
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenSet> {
        let response = self
            .client
            .post(self.token_endpoint.clone())
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?
            .error_for_status()?;

        match response.json::<TokenResponse>().await? {
            TokenResponse::Success {
                access_token,
                refresh_token,
                id_token,
            } => Ok(TokenSet {
                access_token: SecretString::new(access_token.into()),
                refresh_token: refresh_token.map(|v| SecretString::new(v.into())),
                id_token: id_token.map(|v| SecretString::new(v.into())),
            }),
            TokenResponse::Error {
                error,
                error_description,
            } => {
                let detail = error_description.unwrap_or_else(|| error.clone());
                anyhow::bail!("{} token request failed: {detail}", self.name)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        id_token: Option<String>,
    },
    Error {
        error: String,
        error_description: Option<String>,
    },
}

#[async_trait]
impl AuthorizationProvider for OAuthClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let mut url = self.authorize_endpoint.clone();
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("client_id", &self.client_id);
            qp.append_pair("redirect_uri", redirect_uri);
            qp.append_pair("response_type", "code");
            qp.append_pair("state", state);
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        self.request_tokens(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        self.request_tokens(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ])
        .await
    }

    fn identity_claims(&self, tokens: &TokenSet) -> Result<Option<IdentityClaims>, IdentityError> {
        let Some(id_token) = tokens.id_token.as_ref() else {
            return Ok(None);
        };

        identity::decode_id_token(
            &self.name,
            &self.client_id,
            &self.client_secret,
            id_token.expose_secret(),
        )
        .map(Some)
    }
}
