//! Subscout - Entry Point
//!
//! Runs one discovery/fetch/publish cycle and exits. Ctrl+C or SIGTERM stops
//! scheduling new sources; sources already in flight are allowed to finish.

use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subscout::fetch::FetchEngine;
use subscout::keys::{hash_key, load_keys_file, Credential, KeyScheduler, SerpApiProbe};
use subscout::repository::{JsonFileStore, StateStore};
use subscout::services::{
    LogNotifier, Notifier, Pipeline, SearchDiscovery, SeedDiscovery, WebhookNotifier,
};
use subscout::source::SourceStateTracker;
use subscout::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("loading configuration")?;

    let json = config.log.format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("subscout={}", config.log.level).into()),
        )
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    info!("Starting Subscout");

    let store = Arc::new(JsonFileStore::new(&config.paths.data_dir));
    let state = store.load().await.context("loading state")?;

    let http = Client::builder()
        .user_agent(concat!("subscout/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let request_timeout = config.fetch.fetch_timeout();

    let credentials: Vec<Credential> = load_keys_file(&config.paths.keys_file)
        .await?
        .into_iter()
        .map(|key| {
            let registered = state.registration_dates.get(&hash_key(&key)).copied();
            Credential::new(key).with_registration(registered)
        })
        .collect();
    info!("Loaded {} search-API keys", credentials.len());

    let probe = SerpApiProbe::new(http.clone(), &config.keys.account_url, request_timeout);
    let scheduler = Arc::new(KeyScheduler::new(
        credentials,
        Arc::new(probe),
        config.keys.quota_cache_ttl(),
    ));

    let tracker = Arc::new(SourceStateTracker::default());
    let engine = Arc::new(FetchEngine::new(config.fetch.clone(), tracker)?);

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(http.clone(), url, request_timeout)),
        None => Arc::new(LogNotifier),
    };

    let mut pipeline = Pipeline::new(config.clone(), store, engine, notifier)
        .with_discovery(Arc::new(SeedDiscovery::new(&config.paths)))
        .with_scheduler(scheduler.clone());
    if config.discovery.search_enabled {
        pipeline = pipeline.with_discovery(Arc::new(SearchDiscovery::new(
            http.clone(),
            scheduler,
            &config.keys,
            &config.discovery,
            request_timeout,
        )));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, no new sources will be scheduled");
        let _ = shutdown_tx.send(true);
    });

    let summary = pipeline.run_with_state(state, shutdown_rx).await?;
    info!(
        run_id = %summary.run_id,
        alive = summary.sources_alive,
        nodes = summary.nodes_published,
        "Subscout finished"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
