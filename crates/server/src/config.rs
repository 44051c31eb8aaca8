use std::{collections::HashMap, env};

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(String),
    #[error("invalid value for environment variable `{0}`")]
    InvalidVar(String),
    #[error("no OAuth providers configured")]
    NoOAuthProviders,
}

/// One identity provider, loaded once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub authorize_url: Url,
    pub token_url: Url,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub public_base_url: String,
    pub sentry_dsn: Option<String>,
    pub providers: Vec<ProviderConfig>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("SERVER_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingVar("SERVER_DATABASE_URL".into()))?;

        let listen_addr =
            env::var("SERVER_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let public_base_url = env::var("SERVER_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string())
            .trim_end_matches('/')
            .to_string();

        let sentry_dsn = env::var("SENTRY_DSN").ok();

        let providers = providers_from_vars(env::vars())?;

        Ok(Self {
            database_url,
            listen_addr,
            public_base_url,
            sentry_dsn,
            providers,
        })
    }

    /// Browser session cookies are marked `Secure` when the service is
    /// reachable over https only.
    pub fn cookie_secure(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }
}

/// Discovers providers by scanning for `OAUTH_<NAME>_CLIENT_ID`. A provider
/// with a client id but missing secret or endpoint URLs is a hard startup
/// error rather than a silently skipped entry.
fn providers_from_vars(
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<Vec<ProviderConfig>, ConfigError> {
    let vars: HashMap<String, String> = vars.into_iter().collect();

    let mut names: Vec<&str> = vars
        .keys()
        .filter_map(|key| {
            key.strip_prefix("OAUTH_")
                .and_then(|rest| rest.strip_suffix("_CLIENT_ID"))
        })
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_unstable();

    let mut providers = Vec::with_capacity(names.len());
    for name in names {
        let var = |suffix: &str| format!("OAUTH_{name}_{suffix}");
        let require = |suffix: &str| {
            vars.get(&var(suffix))
                .cloned()
                .ok_or_else(|| ConfigError::MissingVar(var(suffix)))
        };

        let client_id = require("CLIENT_ID")?;
        let client_secret = SecretString::new(require("CLIENT_SECRET")?.into());
        let authorize_url = Url::parse(&require("AUTHORIZE_URL")?)
            .map_err(|_| ConfigError::InvalidVar(var("AUTHORIZE_URL")))?;
        let token_url = Url::parse(&require("TOKEN_URL")?)
            .map_err(|_| ConfigError::InvalidVar(var("TOKEN_URL")))?;

        providers.push(ProviderConfig {
            name: name.to_lowercase(),
            client_id,
            client_secret,
            authorize_url,
            token_url,
        });
    }

    if providers.is_empty() {
        return Err(ConfigError::NoOAuthProviders);
    }

    Ok(providers)
}
