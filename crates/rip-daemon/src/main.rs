use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use rip_proto::config::Config;

use rip_daemon::events::{EventHub, BROADCAST_CAPACITY};
use rip_daemon::executor::http::HttpExecutor;
use rip_daemon::http::{create_router, AppState};
use rip_daemon::registry::RegistryCore;
use rip_daemon::sections::SectionStore;
use rip_daemon::settings::SettingsStore;
use rip_daemon::stores::{HistoryStore, SavedStore};
use rip_daemon::version::VersionService;

fn default_filter(debug: bool) -> EnvFilter {
    let directive = if debug {
        "debug,hyper_util=warn,reqwest=warn,hyper=warn"
    } else {
        "info,rip_daemon=debug"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    let data_dir = config.daemon.data_dir.clone();
    std::fs::create_dir_all(&data_dir)?;

    let settings_store = Arc::new(SettingsStore::new(data_dir.join("app_settings.json")));
    let settings = settings_store.load().await;

    // The filter is reloadable so the panel's debug toggle applies without
    // a restart.
    let (filter, filter_handle) = reload::Layer::new(default_filter(settings.debug_logging));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("config loaded from {:?}", Config::config_path());
    info!("data dir: {}", data_dir.display());

    let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let hub = EventHub::new(
        events_tx.clone(),
        Duration::from_millis(config.downloads.progress_interval_ms),
    );

    let executor = Arc::new(HttpExecutor::new());
    let saved = SavedStore::new(data_dir.join("saved_for_later.json"));
    let history = HistoryStore::new(data_dir.join("download_history.json"));
    let (core, registry) = RegistryCore::new(
        config.downloads.clone(),
        executor.clone(),
        hub,
        saved,
        history,
    );

    let log_control: rip_daemon::http::LogControl = Arc::new(move |debug_enabled: bool| {
        let _ = filter_handle.reload(default_filter(debug_enabled));
        info!(
            "debug logging {}",
            if debug_enabled { "enabled" } else { "disabled" }
        );
    });

    let state = AppState {
        registry,
        executor,
        events: events_tx,
        settings: settings_store,
        sections: Arc::new(SectionStore::new(data_dir.join("providers.toml"))),
        version: Arc::new(VersionService::new(data_dir.join("version_cache.json"))),
        log_control,
    };
    let app = create_router(state);

    // The panel edits the port through app settings, not the TOML; a
    // non-default settings value wins.
    let port = if settings.port != rip_daemon::settings::DEFAULT_PORT {
        settings.port
    } else {
        config.http.port
    };
    let addr = format!("{}:{}", config.http.bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("panel API listening at http://{addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {e}");
        }
    });

    info!("daemon initialised, running registry event loop");
    core.run().await?;
    Ok(())
}
