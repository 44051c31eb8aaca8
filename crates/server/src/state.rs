use std::sync::Arc;

use crate::{
    auth::{LoginService, ProviderRegistry},
    config::ServerConfig,
    db::{sessions::SessionStore, users::UserStore},
};

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    login: Arc<LoginService>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        login: Arc<LoginService>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            login,
            sessions,
            users,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn login(&self) -> Arc<LoginService> {
        Arc::clone(&self.login)
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub fn users(&self) -> Arc<dyn UserStore> {
        Arc::clone(&self.users)
    }

    pub fn providers(&self) -> Arc<ProviderRegistry> {
        self.login.providers()
    }

    pub fn cookie_secure(&self) -> bool {
        self.config.cookie_secure()
    }
}
