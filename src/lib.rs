pub mod clock;
mod commands;
pub mod db;
pub mod machines;
pub mod models;
pub mod settings;
pub mod signals;
pub mod simulation;
pub mod timeline;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use clock::SystemClock;
use commands::{dispatch, Cli};
use db::Database;
use settings::SettingsStore;
use signals::SignalStore;

pub(crate) struct AppState {
    pub(crate) db: Database,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) store: SignalStore,
}

pub async fn run() -> Result<()> {
    // RUST_LOG overrides the default level.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir).with_context(|| {
        format!("failed to create data directory {}", cli.data_dir.display())
    })?;

    let db = Database::new(cli.data_dir.join("floorwatch.sqlite3"))?;
    let settings = Arc::new(SettingsStore::new(cli.data_dir.join("settings.json"))?);
    let store = SignalStore::new(db.clone(), Arc::new(SystemClock), settings.clone());
    info!("Floorwatch using {}", cli.data_dir.display());

    let app = AppState {
        db,
        settings,
        store,
    };
    dispatch(&app, cli.command).await
}
