use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const BACKOFF_FACTOR: f64 = 1.5;
const MAX_JITTER: Duration = Duration::from_millis(300);

/// Offsets from setup at which the dashboard reloader re-runs its load.
pub const RELOAD_SCHEDULE_MS: [u64; 5] = [1000, 2000, 3000, 5000, 8000];

/// Exponential backoff with bounded jitter. Attempts are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            factor: BACKOFF_FACTOR,
            max_jitter: MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Wait after the given failed attempt, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.factor.powi(exponent);
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Duration::MAX;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    /// Backoff plus uniform jitter in `[0, max_jitter)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.backoff(attempt).saturating_add(jitter)
    }

    /// Runs `operation` until it succeeds or the attempts run out, returning
    /// the last error untouched. At least one attempt is always made.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    tracing::warn!(attempt, "giving up after {attempts} attempts");
                    return Err(err);
                }
                Err(_) => {
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

pub async fn retry_operation<T, E, F, Fut>(
    operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryPolicy::new(max_attempts, base_delay)
        .run(operation)
        .await
}

/// Shared "data has loaded" flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct LoadSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl LoadSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_loaded(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for LoadSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Tasks spawned by [`setup_dashboard_reloader`].
pub struct DashboardReloader {
    tasks: Vec<JoinHandle<()>>,
}

impl DashboardReloader {
    pub fn scheduled(&self) -> usize {
        self.tasks.len()
    }

    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!("dashboard reload task failed: {err}");
            }
        }
    }
}

/// Calls `load_fn` now and again at each offset in [`RELOAD_SCHEDULE_MS`]
/// unless `signal` reports loaded data by the time a timer fires. Results of
/// `load_fn` are never inspected. Must be called inside a tokio runtime.
pub fn setup_dashboard_reloader<F, Fut>(load_fn: F, signal: LoadSignal) -> DashboardReloader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
{
    let load_fn = Arc::new(load_fn);
    let start = Instant::now();
    let mut tasks = Vec::with_capacity(RELOAD_SCHEDULE_MS.len() + 1);

    let initial = load_fn();
    tasks.push(tokio::spawn(async move {
        initial.await;
    }));

    for offset_ms in RELOAD_SCHEDULE_MS {
        let load_fn = Arc::clone(&load_fn);
        let loaded = signal.subscribe();
        let deadline = start + Duration::from_millis(offset_ms);
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = wait_until_loaded(loaded.clone()) => {
                    tracing::trace!(offset_ms, "reload dropped, data already loaded");
                    return;
                }
            }
            let done = *loaded.borrow();
            if done {
                return;
            }
            tracing::debug!(offset_ms, "scheduled dashboard reload");
            load_fn().await;
        }));
    }

    DashboardReloader { tasks }
}

async fn wait_until_loaded(mut rx: watch::Receiver<bool>) {
    let closed = rx.wait_for(|loaded| *loaded).await.is_err();
    if closed {
        // Every signal handle is gone; only the timer can end the wait.
        std::future::pending::<()>().await;
    }
}
