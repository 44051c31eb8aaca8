use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{body::Body, http::header, response::Response};
use chrono::Utc;
use http_body_util::BodyExt;
use secrecy::SecretString;
use server::{
    AppState,
    auth::{
        AuthorizationProvider, IdentityClaims, IdentityError, LoginService, ProviderRegistry,
        TokenSet,
    },
    config::ServerConfig,
    db::{
        sessions::{PendingLogin, Session, SessionStore, SessionStoreError},
        users::{NewUser, User, UserStore, UserStoreError},
    },
    routes,
};
use url::Url;
use uuid::Uuid;

pub const PUBLIC_BASE_URL: &str = "http://localhost:8081";
pub const STUB_ACCESS_TOKEN: &str = "stub-access-token";
pub const STUB_REFRESH_TOKEN: &str = "stub-refresh-token";
pub const ROTATED_ACCESS_TOKEN: &str = "rotated-access-token";
pub const ROTATED_REFRESH_TOKEN: &str = "rotated-refresh-token";

#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<Mutex<Vec<User>>>,
}

impl InMemoryUserStore {
    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.email == email)
            .cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        Ok(self.user_by_email(email))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|user| user.id == id)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, UserStoreError> {
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            display_name: user.display_name,
            oauth_provider: user.oauth_provider,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.users.lock().unwrap().push(user.clone());
        Ok(user)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> Result<Session, SessionStoreError> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: None,
            pending_login: None,
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<Session, SessionStoreError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(SessionStoreError::NotFound)
    }

    async fn set_pending_login(
        &self,
        id: Uuid,
        pending: PendingLogin,
    ) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(SessionStoreError::NotFound)?;
        session.pending_login = Some(pending);
        Ok(())
    }

    async fn attach_user(&self, id: Uuid, user_id: Uuid) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(SessionStoreError::NotFound)?;
        session.user_id = Some(user_id);
        Ok(())
    }

    async fn touch(&self, id: Uuid) -> Result<(), SessionStoreError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&id) {
            session.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke(&self, id: Uuid) -> Result<(), SessionStoreError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&id) {
            session.revoked_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Provider double: single-use codes, configurable identity claims, call
/// counters so tests can assert "zero external calls" properties.
#[derive(Clone)]
pub struct StubProvider {
    name: String,
    authorize_endpoint: Url,
    claims: Arc<Mutex<IdentityClaims>>,
    used_codes: Arc<Mutex<HashSet<String>>>,
    last_exchange_redirect_uri: Arc<Mutex<Option<String>>>,
    exchange_calls: Arc<AtomicUsize>,
    refresh_calls: Arc<AtomicUsize>,
}

impl StubProvider {
    pub fn jaccount() -> Self {
        Self {
            name: "jaccount".to_string(),
            authorize_endpoint: Url::parse("https://jaccount.sjtu.edu.cn/oauth2/authorize")
                .unwrap(),
            claims: Arc::new(Mutex::new(IdentityClaims {
                subject: "alice".to_string(),
                email: "alice@sjtu.edu.cn".to_string(),
                display_name: "alice".to_string(),
            })),
            used_codes: Arc::new(Mutex::new(HashSet::new())),
            last_exchange_redirect_uri: Arc::new(Mutex::new(None)),
            exchange_calls: Arc::new(AtomicUsize::new(0)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_claims(&self, claims: IdentityClaims) {
        *self.claims.lock().unwrap() = claims;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn last_exchange_redirect_uri(&self) -> Option<String> {
        self.last_exchange_redirect_uri.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthorizationProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let mut url = self.authorize_endpoint.clone();
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("client_id", "portal");
            qp.append_pair("redirect_uri", redirect_uri);
            qp.append_pair("response_type", "code");
            qp.append_pair("state", state);
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_exchange_redirect_uri.lock().unwrap() = Some(redirect_uri.to_string());

        if !self.used_codes.lock().unwrap().insert(code.to_string()) {
            anyhow::bail!("jaccount token request failed: code already redeemed");
        }

        Ok(TokenSet {
            access_token: SecretString::new(STUB_ACCESS_TOKEN.into()),
            refresh_token: Some(SecretString::new(STUB_REFRESH_TOKEN.into())),
            id_token: Some(SecretString::new("stub-id-token".into())),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        if refresh_token != STUB_REFRESH_TOKEN {
            anyhow::bail!("jaccount token request failed: invalid refresh token");
        }

        Ok(TokenSet {
            access_token: SecretString::new(ROTATED_ACCESS_TOKEN.into()),
            refresh_token: Some(SecretString::new(ROTATED_REFRESH_TOKEN.into())),
            id_token: None,
        })
    }

    fn identity_claims(&self, _tokens: &TokenSet) -> Result<Option<IdentityClaims>, IdentityError> {
        Ok(Some(self.claims.lock().unwrap().clone()))
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub users: InMemoryUserStore,
    pub provider: StubProvider,
}

pub fn test_app() -> TestApp {
    let users = InMemoryUserStore::default();
    let provider = StubProvider::jaccount();

    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let registry = Arc::new(registry);

    let sessions_dyn: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
    let users_dyn: Arc<dyn UserStore> = Arc::new(users.clone());

    let login = Arc::new(LoginService::new(
        registry,
        Arc::clone(&sessions_dyn),
        Arc::clone(&users_dyn),
        PUBLIC_BASE_URL.to_string(),
    ));

    let config = ServerConfig {
        database_url: "postgres://unused".to_string(),
        listen_addr: "127.0.0.1:0".to_string(),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        sentry_dsn: None,
        providers: Vec::new(),
    };

    let state = AppState::new(config, login, sessions_dyn, users_dyn);

    TestApp {
        router: routes::router(state),
        users,
        provider,
    }
}

pub fn session_cookie_from(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("response sets a session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

pub fn location_url(response: &Response) -> Url {
    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("response is a redirect")
        .to_str()
        .unwrap();
    Url::parse(location).unwrap()
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn json_request(
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: serde_json::Value,
) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}
