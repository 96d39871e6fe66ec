pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod models;
pub mod normalize;
pub mod retry;
pub mod store;
mod utils;

use anyhow::{anyhow, Context, Result};

use api::ApiClient;
use config::ConfigStore;
use db::Store;
use store::{Dashboard, EventStore};

pub use context::TenantContext;
pub use models::{EventStatus, NormalizedEvent};
pub use normalize::{normalize, normalize_many, EventNormalizer};
pub use retry::{retry_operation, setup_dashboard_reloader, LoadSignal, RetryPolicy};

/// Loads config, fills the event store for the configured tenant and returns
/// the resulting dashboard once the reload schedule has run its course.
pub async fn run() -> Result<Dashboard> {
    let config_store = ConfigStore::load();
    let mut config = config_store.read();
    config.apply_overrides(|key| std::env::var(key).ok());

    let ctx = config.tenant_context().map_err(|err| anyhow!(err))?;
    let api = ApiClient::new(&config.api_base_url)
        .with_context(|| format!("bad api url {}", config.api_base_url))?;

    let mut store = EventStore::new(api, ctx)
        .with_policy(config.retry_policy())
        .with_zone(config.zone());

    match tokio::task::spawn_blocking(Store::open_default).await? {
        Ok(cache) => store = store.with_cache(cache),
        Err(err) => tracing::warn!("event cache unavailable: {err}"),
    }

    match store.prime_from_cache().await {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "primed dashboard from cache"),
        Err(err) => tracing::warn!("cache read failed: {err}"),
    }

    store.start_dashboard_reloader().join().await;

    let snapshot = store.snapshot().await;
    if let Some(err) = &snapshot.last_error {
        if snapshot.events.is_empty() {
            return Err(anyhow!("no events loaded: {err}"));
        }
        tracing::warn!("serving cached events after failure: {err}");
    }

    Ok(store.dashboard().await)
}
