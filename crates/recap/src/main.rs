mod config_file;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use recap_api::{ApiServer, AppState};
use recap_store::SecretStore;
use recap_store::document::ConfigDocument;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_FILE: &str = "config.db";

#[derive(Debug, Parser)]
#[command(
    name = "recap",
    about = "Back up conversations from a chat service and republish them to Anytype or Notion"
)]
struct Cli {
    /// SQLite file backing the encrypted configuration store.
    #[arg(long = "config-db")]
    config_db: Option<String>,

    /// Address the web console listens on, e.g. 127.0.0.1:8080.
    #[arg(long)]
    listen: Option<String>,

    /// JSON configuration file (or a directory containing config.json).
    #[arg(long = "config-file")]
    config_file: Option<String>,

    /// Passphrase that unlocks the configuration store at startup; on a
    /// virgin store it becomes the initial password. Falls back to the
    /// RECAP_CONFIG_SECRET environment variable.
    #[arg(long = "config-secret")]
    config_secret: Option<String>,

    /// Directory with the built console front-end, served at /.
    #[arg(long = "assets-dir")]
    assets_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // Defaults, then the optional config file, then explicit flags.
    let mut doc = ConfigDocument::default();
    let config_path = config_file::resolve_config_path(cli.config_file.as_deref().unwrap_or(""));
    match config_file::load_config_file(&config_path) {
        Ok(Some(patch)) => {
            info!("configuration file loaded from {}", config_path.display());
            patch.apply(&mut doc);
        }
        Ok(None) => {}
        Err(err) => return Err(err.wrap_err("reading the configuration file failed")),
    }
    if let Some(listen) = &cli.listen {
        doc.listen = listen.clone();
    }
    doc.normalize();

    let db_path = resolve_db_path(cli.config_db.as_deref());
    let store = Arc::new(SecretStore::open(&db_path)?);
    info!("configuration store opened at {}", db_path.display());

    let secret = cli
        .config_secret
        .or_else(|| std::env::var("RECAP_CONFIG_SECRET").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    prepare_store(&store, &mut doc, secret.as_deref());

    // An explicit --listen flag wins over whatever was persisted.
    if let Some(listen) = &cli.listen {
        doc.listen = listen.trim().to_string();
        doc.normalize();
    }

    let listen = doc.listen.clone();
    let state = Arc::new(AppState::new(store, doc));
    let server = ApiServer::new(state, &listen, cli.assets_dir).await?;

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

fn resolve_db_path(flag: Option<&str>) -> PathBuf {
    match flag.map(str::trim).filter(|s| !s.is_empty()) {
        Some(path) => config_file::expand_user_home(path),
        None => dirs::config_dir()
            .map_or_else(|| PathBuf::from("."), |dir| dir.join("recap"))
            .join(DEFAULT_DB_FILE),
    }
}

/// Brings the store and the startup document in line with each other:
/// auto-unlock (or initialize) with the supplied secret, bootstrap the
/// defaults on a virgin store, and merge the persisted document over the
/// startup document once the store is readable. Every failure here is
/// logged rather than fatal; the console must come up so the operator can
/// fix the configuration interactively.
fn prepare_store(store: &Arc<SecretStore>, doc: &mut ConfigDocument, secret: Option<&str>) {
    if let Some(secret) = secret {
        if store.has_password() {
            match store.unlock(secret) {
                Ok(()) => info!("configuration store unlocked with the startup secret"),
                Err(err) => warn!("automatic unlock failed: {err}"),
            }
        } else {
            match store.set_password(secret) {
                Ok(()) => {
                    info!("configuration password initialized from the startup secret");
                    if let Err(err) = store.save_config(doc) {
                        warn!("initial configuration persist failed: {err}");
                    }
                }
                Err(err) => warn!("initializing the configuration password failed: {err}"),
            }
        }
    }

    match store.has_config_items() {
        Ok(false) if !store.has_password() => {
            // First run, no password yet: persist the non-sensitive
            // defaults so the store file is ready to use.
            if let Err(err) = store.bootstrap_defaults(&doc.without_sensitive_values()) {
                warn!("writing default configuration failed: {err}");
            }
        }
        Ok(_) => {}
        Err(err) => warn!("checking the configuration store failed: {err}"),
    }

    if store.is_unlocked() {
        match store.load_config() {
            Ok(persisted) => {
                info!("persisted configuration loaded");
                *doc = persisted;
            }
            Err(err) => warn!("loading the persisted configuration failed: {err}"),
        }
    }
}
