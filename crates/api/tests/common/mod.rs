#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum_test::TestServer;
use recap_api::{AppState, build_router};
use recap_store::SecretStore;
use recap_store::document::ConfigDocument;
use tempfile::TempDir;

pub const PASSWORD: &str = "test_password_123";

pub struct TestContext {
    pub server: TestServer,
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl TestContext {
    /// Builds a console over a fresh store in an isolated temp directory.
    pub fn new() -> color_eyre::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let db_path = temp_dir.path().join("config.db");
        let server = Self::server_for(&db_path)?;
        Ok(Self {
            server,
            temp_dir,
            db_path,
        })
    }

    /// Builds a second console over the same store file, simulating a
    /// process restart: the new store starts locked.
    pub fn restart(&self) -> color_eyre::Result<TestServer> {
        Self::server_for(&self.db_path)
    }

    fn server_for(db_path: &std::path::Path) -> color_eyre::Result<TestServer> {
        let store = Arc::new(SecretStore::open(db_path)?);
        let state = Arc::new(AppState::new(store, ConfigDocument::default()));
        let app = build_router(state, None);
        TestServer::new(app).map_err(|e| color_eyre::eyre::eyre!("test server: {e}"))
    }

    /// Sets the initial password through the API.
    pub async fn set_password(&self) {
        let response = self
            .server
            .post("/api/config/password")
            .json(&serde_json::json!({ "password": PASSWORD }))
            .await;
        response.assert_status_ok();
    }
}
