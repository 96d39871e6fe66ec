use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::api::{ApiClient, ApiError};
use crate::context::TenantContext;
use crate::db::Store;
use crate::models::{EventStatus, NormalizedEvent};
use crate::normalize::{normalize_many, EventNormalizer};
use crate::retry::{setup_dashboard_reloader, DashboardReloader, LoadSignal, RetryPolicy};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("cache error: {0}")]
    Cache(String),
}

#[derive(Debug, Clone, Default)]
pub struct EventState {
    pub events: Vec<NormalizedEvent>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub last_loaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub upcoming: Vec<NormalizedEvent>,
    pub ongoing: Vec<NormalizedEvent>,
    pub completed: Vec<NormalizedEvent>,
}

/// Shared, cloneable view of one tenant's events.
#[derive(Clone)]
pub struct EventStore {
    api: Arc<ApiClient>,
    ctx: TenantContext,
    policy: RetryPolicy,
    zone: Option<Tz>,
    cache: Option<Arc<Mutex<Store>>>,
    signal: LoadSignal,
    state: Arc<RwLock<EventState>>,
}

impl EventStore {
    pub fn new(api: ApiClient, ctx: TenantContext) -> Self {
        Self {
            api: Arc::new(api),
            ctx,
            policy: RetryPolicy::default(),
            zone: None,
            cache: None,
            signal: LoadSignal::new(),
            state: Arc::new(RwLock::new(EventState::default())),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_zone(mut self, zone: Option<Tz>) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_cache(mut self, cache: Store) -> Self {
        self.cache = Some(Arc::new(Mutex::new(cache)));
        self
    }

    pub fn signal(&self) -> &LoadSignal {
        &self.signal
    }

    /// Fetches with retries, then normalizes and caches the result.
    pub async fn fetch_events(&self) -> Result<usize, StoreError> {
        self.state.write().await.loading = true;

        let api = Arc::clone(&self.api);
        let ctx = self.ctx.clone();
        let fetched = self
            .policy
            .run(|| {
                let api = Arc::clone(&api);
                let ctx = ctx.clone();
                async move { api.list_events(&ctx).await }
            })
            .await;

        match fetched {
            Ok(raw) => self.apply_raw(&raw).await,
            Err(err) => {
                let mut state = self.state.write().await;
                state.loading = false;
                state.last_error = Some(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Replaces state with the normalized form of a raw event list. An empty
    /// list leaves the current events and the cache alone, and the load
    /// signal is raised only when at least one event came back.
    pub async fn apply_raw(&self, raw: &Value) -> Result<usize, StoreError> {
        let events = match self.zone {
            Some(tz) => EventNormalizer::new(tz).normalize_many(Some(raw)),
            None => normalize_many(Some(raw)),
        };
        let count = events.len();

        if count == 0 {
            let mut state = self.state.write().await;
            state.loading = false;
            state.last_error = None;
            tracing::info!(
                tenant = %self.ctx.tenant_id,
                kept = state.events.len(),
                "backend returned no events yet"
            );
            return Ok(0);
        }

        if let Err(err) = self.persist(events.clone()).await {
            tracing::warn!(tenant = %self.ctx.tenant_id, "event cache write failed: {err}");
        }

        {
            let mut state = self.state.write().await;
            state.events = events;
            state.loading = false;
            state.last_error = None;
            state.last_loaded_at = Some(Utc::now());
        }

        self.signal.mark_loaded();
        tracing::info!(tenant = %self.ctx.tenant_id, count, "events loaded");
        Ok(count)
    }

    /// Seeds state from the local cache. Does not raise the load signal, so
    /// a running reloader still refreshes from the backend.
    pub async fn prime_from_cache(&self) -> Result<usize, StoreError> {
        let Some(cache) = self.cache.clone() else {
            return Ok(0);
        };
        let tenant_id = self.ctx.tenant_id.clone();
        let cached = tokio::task::spawn_blocking(move || -> Result<_, String> {
            let store = cache
                .lock()
                .map_err(|_| "cache mutex poisoned".to_string())?;
            store.list_events(&tenant_id).map_err(|err| err.to_string())
        })
        .await
        .map_err(|err| StoreError::Cache(err.to_string()))?
        .map_err(StoreError::Cache)?;

        let count = cached.len();
        if count > 0 {
            let mut state = self.state.write().await;
            if state.events.is_empty() {
                state.events = cached;
            }
        }
        Ok(count)
    }

    async fn persist(&self, events: Vec<NormalizedEvent>) -> Result<(), StoreError> {
        let Some(cache) = self.cache.clone() else {
            return Ok(());
        };
        let tenant_id = self.ctx.tenant_id.clone();
        tokio::task::spawn_blocking(move || -> Result<(), String> {
            let mut store = cache
                .lock()
                .map_err(|_| "cache mutex poisoned".to_string())?;
            store
                .replace_events(&tenant_id, &events)
                .map(|_| ())
                .map_err(|err| err.to_string())
        })
        .await
        .map_err(|err| StoreError::Cache(err.to_string()))?
        .map_err(StoreError::Cache)
    }

    /// Loads now and re-polls on the fixed schedule until data shows up.
    pub fn start_dashboard_reloader(&self) -> DashboardReloader {
        let store = self.clone();
        setup_dashboard_reloader(
            move || {
                let store = store.clone();
                async move {
                    if let Err(err) = store.fetch_events().await {
                        tracing::warn!("dashboard load failed: {err}");
                    }
                }
            },
            self.signal.clone(),
        )
    }

    pub async fn snapshot(&self) -> EventState {
        self.state.read().await.clone()
    }

    pub async fn events(&self) -> Vec<NormalizedEvent> {
        self.state.read().await.events.clone()
    }

    pub async fn event_by_id(&self, id: &str) -> Option<NormalizedEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .find(|event| event.id_key().as_deref() == Some(id))
            .cloned()
    }

    /// Soonest first.
    pub async fn upcoming_events(&self) -> Vec<NormalizedEvent> {
        let mut events = self.with_status(EventStatus::Upcoming).await;
        events.sort_by_key(|event| event.event_date);
        events
    }

    pub async fn ongoing_events(&self) -> Vec<NormalizedEvent> {
        let mut events = self.with_status(EventStatus::Ongoing).await;
        events.sort_by_key(|event| event.event_date);
        events
    }

    /// Most recent first.
    pub async fn past_events(&self) -> Vec<NormalizedEvent> {
        let mut events = self.with_status(EventStatus::Completed).await;
        events.sort_by(|a, b| b.event_date.cmp(&a.event_date));
        events
    }

    pub async fn active_events(&self) -> Vec<NormalizedEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.is_active)
            .cloned()
            .collect()
    }

    pub async fn dashboard(&self) -> Dashboard {
        Dashboard {
            upcoming: self.upcoming_events().await,
            ongoing: self.ongoing_events().await,
            completed: self.past_events().await,
        }
    }

    async fn with_status(&self, status: EventStatus) -> Vec<NormalizedEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.status == status)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};
    use serde_json::json;

    fn offline_store() -> EventStore {
        // Port 9 (discard) is never served locally, so requests fail fast.
        let api = ApiClient::new("http://127.0.0.1:9/api").expect("client");
        EventStore::new(api, TenantContext::new("t-1"))
            .with_policy(RetryPolicy::new(1, std::time::Duration::from_millis(1)))
    }

    fn day(offset: i64) -> String {
        (Local::now() + Duration::days(offset))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn raw_events() -> Value {
        json!([
            { "id": 1, "title": "Later", "event_date": day(10), "event_time": "10:00:00" },
            { "id": 2, "title": "Today", "event_date": day(0), "event_time": "12:00:00" },
            { "id": 3, "title": "Soon", "event_date": day(2), "event_time": "08:00:00", "is_active": false },
            { "id": 4, "title": "Old", "event_date": day(-5), "event_time": "09:00:00" },
            { "id": 5, "title": "Older", "event_date": day(-30), "event_time": "09:00:00" },
        ])
    }

    fn titles(events: &[NormalizedEvent]) -> Vec<String> {
        events.iter().map(NormalizedEvent::title).collect()
    }

    #[tokio::test]
    async fn apply_raw_buckets_by_status() {
        let store = offline_store();
        assert!(!store.signal().is_loaded());

        let count = store.apply_raw(&raw_events()).await.unwrap();
        assert_eq!(count, 5);
        assert!(store.signal().is_loaded());

        assert_eq!(titles(&store.upcoming_events().await), vec!["Soon", "Later"]);
        assert_eq!(titles(&store.ongoing_events().await), vec!["Today"]);
        assert_eq!(titles(&store.past_events().await), vec!["Old", "Older"]);
        assert_eq!(store.active_events().await.len(), 4);
        assert_eq!(
            store.event_by_id("4").await.map(|e| e.title()),
            Some("Old".to_string())
        );
        assert!(store.event_by_id("missing").await.is_none());

        let snapshot = store.snapshot().await;
        assert!(!snapshot.loading);
        assert!(snapshot.last_loaded_at.is_some());
    }

    #[tokio::test]
    async fn empty_payload_leaves_signal_down() {
        let store = offline_store();
        assert_eq!(store.apply_raw(&json!({ "oops": true })).await.unwrap(), 0);
        assert!(!store.signal().is_loaded());
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn cache_primes_a_fresh_store() {
        let writer = offline_store().with_cache(Store::open_in_memory().unwrap());
        writer.apply_raw(&raw_events()).await.unwrap();

        let shared = writer.cache.clone().expect("cache");
        let mut reader = offline_store();
        reader.cache = Some(shared);

        assert_eq!(reader.prime_from_cache().await.unwrap(), 5);
        assert_eq!(reader.events().await, writer.events().await);
        assert!(!reader.signal().is_loaded());
    }

    #[tokio::test]
    async fn empty_read_keeps_primed_events_and_cache() {
        let writer = offline_store().with_cache(Store::open_in_memory().unwrap());
        writer.apply_raw(&raw_events()).await.unwrap();

        let shared = writer.cache.clone().expect("cache");
        let mut reader = offline_store();
        reader.cache = Some(Arc::clone(&shared));
        assert_eq!(reader.prime_from_cache().await.unwrap(), 5);

        assert_eq!(reader.apply_raw(&json!([])).await.unwrap(), 0);
        assert_eq!(reader.events().await.len(), 5);
        assert!(!reader.signal().is_loaded());
        assert!(!reader.snapshot().await.loading);
        assert_eq!(shared.lock().unwrap().list_events("t-1").unwrap().len(), 5);
    }

    #[tokio::test]
    async fn reloader_stops_after_data_arrives() {
        let store = offline_store();
        let started = std::time::Instant::now();
        let reloader = store.start_dashboard_reloader();
        assert_eq!(reloader.scheduled(), 6);

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!store.signal().is_loaded());
        store.apply_raw(&raw_events()).await.unwrap();
        assert!(store.signal().is_loaded());

        reloader.join().await;
        // the 5s and 8s reloads were dropped
        assert!(started.elapsed() < std::time::Duration::from_millis(5000));
        assert_eq!(store.events().await.len(), 5);
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded() {
        let store = offline_store();
        let err = store.fetch_events().await.unwrap_err();
        assert!(matches!(err, StoreError::Api(ApiError::Http(_))));

        let snapshot = store.snapshot().await;
        assert!(!snapshot.loading);
        assert!(snapshot.last_error.is_some());
        assert!(!store.signal().is_loaded());
    }

    #[tokio::test]
    async fn zone_controls_normalization() {
        let store = offline_store().with_zone(Some(chrono_tz::Asia::Kolkata));
        store
            .apply_raw(&json!([{ "id": 1, "event_date": "2030-01-01", "event_time": "06:00:00" }]))
            .await
            .unwrap();
        let event = store.event_by_id("1").await.unwrap();
        assert_eq!(event.event_date.to_rfc3339(), "2030-01-01T06:00:00+05:30");
    }
}
