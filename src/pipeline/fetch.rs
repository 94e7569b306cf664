//! Rate-limited HTTP fetch layer
//!
//! One `RateLimitedClient` per external provider. The client enforces, in
//! order:
//! 1. a local daily-quota ceiling (reset at local-day boundaries) - a
//!    request rejected here never reaches the network and does not count
//!    against the quota
//! 2. minimum inter-request spacing (provider-specific)
//! 3. bounded retries: HTTP 429 backs off long (~60s), other transient
//!    failures short (~5s); exhausting retries surfaces the last error
//!
//! Every attempted request - success or failure - increments the daily
//! counter. The whole request path runs under one async mutex, which also
//! confines the provider to a single in-flight call at a time.
//!
//! Clock and transport are injected so quota, spacing, and retry behavior
//! are testable with a fake clock and no network.

use super::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use chrono::TimeZone;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Clock function: epoch seconds. Injected for testing.
pub type NowFn = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> NowFn {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Outcome of a single transport-level attempt
#[derive(Debug)]
pub enum FetchFailure {
    /// Provider-side rate limit (HTTP 429)
    RateLimited,
    /// Any other retryable failure (timeout, 5xx, connection error)
    Transient(String),
}

/// Transport seam: performs one GET and parses the body as JSON.
///
/// The production impl wraps `reqwest`; tests swap in a scripted fake.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchFailure>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_json(&self, url: &str) -> Result<Value, FetchFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(FetchFailure::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FetchFailure::Transient(format!("HTTP {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchFailure::Transient(e.to_string()))
    }
}

/// Per-provider limits
#[derive(Debug, Clone)]
pub struct ProviderLimits {
    pub name: String,
    pub min_interval: Duration,
    pub daily_quota: u32,
    pub max_retries: u32,
    pub backoff_rate_limited: Duration,
    pub backoff_transient: Duration,
}

impl ProviderLimits {
    pub fn new(name: &str, min_interval: Duration, daily_quota: u32, max_retries: u32) -> Self {
        Self {
            name: name.to_string(),
            min_interval,
            daily_quota,
            max_retries,
            backoff_rate_limited: Duration::from_secs(60),
            backoff_transient: Duration::from_secs(5),
        }
    }
}

struct GateState {
    /// Epoch seconds of the last attempted request
    last_request_at: Option<i64>,
    /// Local day ordinal the counter belongs to
    usage_day: i32,
    /// Attempted requests so far today
    used_today: u32,
}

/// Rate-limited JSON fetch client for one provider
pub struct RateLimitedClient {
    limits: ProviderLimits,
    transport: Arc<dyn HttpTransport>,
    now_fn: NowFn,
    gate: Mutex<GateState>,
}

/// Local-day ordinal for an epoch timestamp (quota resets at local
/// midnight, not UTC)
fn local_day_ordinal(epoch_secs: i64) -> i32 {
    match chrono::Local.timestamp_opt(epoch_secs, 0).single() {
        Some(dt) => chrono::Datelike::num_days_from_ce(&dt.date_naive()),
        None => (epoch_secs / 86_400) as i32,
    }
}

impl RateLimitedClient {
    pub fn new(limits: ProviderLimits, transport: Arc<dyn HttpTransport>, now_fn: NowFn) -> Self {
        let day = local_day_ordinal(now_fn());
        Self {
            limits,
            transport,
            now_fn,
            gate: Mutex::new(GateState { last_request_at: None, usage_day: day, used_today: 0 }),
        }
    }

    pub fn provider(&self) -> &str {
        &self.limits.name
    }

    /// Attempted requests counted against today's quota
    pub async fn used_today(&self) -> u32 {
        let mut gate = self.gate.lock().await;
        self.roll_day(&mut gate);
        gate.used_today
    }

    fn roll_day(&self, gate: &mut GateState) {
        let today = local_day_ordinal((self.now_fn)());
        if today != gate.usage_day {
            gate.usage_day = today;
            gate.used_today = 0;
        }
    }

    /// Fetch a JSON document, enforcing quota, spacing, and bounded retries.
    ///
    /// The gate mutex is held for the whole call: two timers sharing one
    /// provider client can never have overlapping in-flight requests.
    pub async fn get_json(&self, url: &str) -> PipelineResult<Value> {
        let mut gate = self.gate.lock().await;

        self.roll_day(&mut gate);
        if gate.used_today >= self.limits.daily_quota {
            log::warn!(
                "🚦 {} daily quota reached ({}/{}), rejecting locally",
                self.limits.name,
                gate.used_today,
                self.limits.daily_quota
            );
            return Err(PipelineError::QuotaExceeded(self.limits.name.clone()));
        }

        // Inter-request spacing, measured from the last attempt
        if let Some(last) = gate.last_request_at {
            let elapsed = ((self.now_fn)() - last).max(0) as u64;
            let min_secs = self.limits.min_interval.as_secs_f64();
            if (elapsed as f64) < min_secs {
                let wait = self.limits.min_interval.saturating_sub(Duration::from_secs(elapsed));
                tokio::time::sleep(wait).await;
            }
        }

        let attempts = self.limits.max_retries + 1;
        let mut last_err = PipelineError::transient("no attempt made");

        for attempt in 1..=attempts {
            gate.last_request_at = Some((self.now_fn)());
            gate.used_today += 1;

            match self.transport.get_json(url).await {
                Ok(value) => return Ok(value),
                Err(FetchFailure::RateLimited) => {
                    log::warn!(
                        "🚦 {} rate limited (attempt {}/{})",
                        self.limits.name,
                        attempt,
                        attempts
                    );
                    last_err = PipelineError::transient(format!("{} rate limited", self.limits.name));
                    if attempt < attempts {
                        tokio::time::sleep(self.limits.backoff_rate_limited).await;
                    }
                }
                Err(FetchFailure::Transient(msg)) => {
                    log::warn!(
                        "⚠️  {} request failed (attempt {}/{}): {}",
                        self.limits.name,
                        attempt,
                        attempts,
                        msg
                    );
                    last_err = PipelineError::transient(msg);
                    if attempt < attempts {
                        tokio::time::sleep(self.limits.backoff_transient).await;
                    }
                }
            }
        }

        Err(last_err)
    }
}

/// Long-lived cache for slowly-changing reference data (e.g. the token
/// catalog), served stale-on-error: if a refresh fails and a previous value
/// exists, the previous value is returned instead of the error.
pub struct TtlCache<T: Clone> {
    ttl: Duration,
    now_fn: NowFn,
    slot: Mutex<Option<(i64, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, now_fn: NowFn) -> Self {
        Self { ttl, now_fn, slot: Mutex::new(None) }
    }

    /// Return the cached value if fresh; otherwise refresh via `fetch`.
    /// A failed refresh falls back to the stale value when one exists.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> PipelineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = PipelineResult<T>>,
    {
        let mut slot = self.slot.lock().await;
        let now = (self.now_fn)();

        if let Some((fetched_at, value)) = slot.as_ref() {
            if now - fetched_at < self.ttl.as_secs() as i64 {
                return Ok(value.clone());
            }
        }

        match fetch().await {
            Ok(value) => {
                *slot = Some((now, value.clone()));
                Ok(value)
            }
            Err(e) => match slot.as_ref() {
                Some((_, stale)) => {
                    log::warn!("⚠️  Cache refresh failed, serving stale value: {}", e);
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}
