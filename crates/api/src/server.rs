use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use recap_export::SourceClient;
use recap_store::SecretStore;
use recap_store::document::ConfigDocument;

use crate::cache::ConversationCache;
use crate::clients::ClientPool;
use crate::coordinator::ConfigCoordinator;
use crate::handlers;

/// Shared state handed to every request handler. The coordinator owns the
/// live configuration; the store, cache and pool are the components it
/// keeps consistent.
pub struct AppState {
    pub store: Arc<SecretStore>,
    pub coordinator: Arc<ConfigCoordinator>,
    pub cache: Arc<ConversationCache>,
    pub pool: Arc<ClientPool>,
    pub source: SourceClient,
}

impl AppState {
    /// Wires the store, cache, client pool and coordinator together
    /// around one shared HTTP connection pool.
    #[must_use]
    pub fn new(store: Arc<SecretStore>, initial: ConfigDocument) -> Self {
        let http = reqwest::Client::new();
        let cache = Arc::new(ConversationCache::new());
        let pool = Arc::new(ClientPool::new(http.clone()));
        let coordinator = Arc::new(ConfigCoordinator::new(
            initial,
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&pool),
        ));
        Self {
            store,
            coordinator,
            cache,
            pool,
            source: SourceClient::new(http),
        }
    }
}

pub struct ApiServer {
    app: Router,
    listener: TcpListener,
}

impl ApiServer {
    /// # Errors
    /// Returns an error if the TCP binding to the given address fails.
    pub async fn new(
        state: Arc<AppState>,
        bind_address: &str,
        assets_dir: Option<PathBuf>,
    ) -> color_eyre::Result<Self> {
        let app = build_router(state, assets_dir);
        let listener = TcpListener::bind(bind_address).await?;
        info!("web console will bind to: {}", bind_address);
        Ok(Self { app, listener })
    }

    /// # Errors
    /// Returns an error if reading the local address or serving fails.
    pub async fn serve(self) -> color_eyre::Result<()> {
        let addr = self.listener.local_addr()?;
        info!("web console listening on http://{}", addr);
        axum::serve(self.listener, self.app).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if getting the local address from the TCP
    /// listener fails.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }
}

/// Assembles the console router. With an assets directory the console
/// front-end is served as the fallback for non-API paths.
#[must_use]
pub fn build_router(state: Arc<AppState>, assets_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    let mut app = Router::new()
        .route("/api/config/state", get(handlers::config_state))
        .route("/api/config/unlock", post(handlers::config_unlock))
        .route("/api/config/password", post(handlers::config_password))
        .route("/api/config", get(handlers::config_get).post(handlers::config_update))
        .route("/api/conversations", get(handlers::list_conversations))
        .route("/api/conversations/delete", post(handlers::delete_conversations))
        .route("/api/conversations/{id}", get(handlers::conversation_detail))
        .route("/api/import", post(handlers::import_conversations));

    if let Some(dir) = assets_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}
