use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use tracing::instrument;

use crate::{
    AppState,
    auth::{LoginService, OAuthClient, ProviderRegistry},
    config::ServerConfig,
    db::{self, sessions::{PgSessionStore, SessionStore}, users::{PgUserStore, UserStore}},
    routes,
};

pub struct Server;

impl Server {
    #[instrument(
        name = "auth_server",
        skip(config),
        fields(listen_addr = %config.listen_addr)
    )]
    pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
        let pool = db::create_pool(&config.database_url)
            .await
            .context("failed to create postgres pool")?;

        db::migrate(&pool)
            .await
            .context("failed to run database migrations")?;

        let mut registry = ProviderRegistry::new();
        for provider in &config.providers {
            tracing::info!(provider = %provider.name, "registering OAuth provider");
            registry.register(OAuthClient::new(provider.clone())?);
        }

        if registry.is_empty() {
            bail!("no OAuth providers configured");
        }

        let registry = Arc::new(registry);

        let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
        let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));

        let login = Arc::new(LoginService::new(
            registry,
            Arc::clone(&sessions),
            Arc::clone(&users),
            config.public_base_url.clone(),
        ));

        let state = AppState::new(config.clone(), login, sessions, users);

        let router = routes::router(state);
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        tracing::info!(%addr, "auth server listening");

        axum::serve(tcp_listener, router.into_make_service())
            .await
            .context("auth server failure")?;

        Ok(())
    }
}
