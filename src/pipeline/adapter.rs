//! Event source adapter - classifies the raw log feed into typed events
//!
//! The subscription feed delivers `{signature, log lines}` notifications.
//! The adapter:
//! 1. classifies each notification (pool-init / swap / noise) by log-line
//!    keywords
//! 2. resolves the signature to enriched transfer data (mint, token and
//!    SOL amounts) through the enrichment provider
//! 3. normalizes amounts to USD with the cached SOL/USD reference price
//! 4. publishes typed `PipelineEvent`s on the pipeline channel
//!
//! Aggregation never sees a raw log line, and this loop never touches the
//! store - the channel is the only coupling. Per-notification failures are
//! logged and the loop continues.

use super::error::{PipelineError, PipelineResult};
use super::fetch::RateLimitedClient;
use super::markets::MarketDataService;
use super::types::{LogNotification, PipelineEvent, PoolInitEvent, SwapEvent};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Log-line keywords marking a pool initialization
const POOL_INIT_MARKERS: [&str; 3] = ["initialize2", "InitializePool", "init_pool"];
/// Log-line keywords marking a swap
const SWAP_MARKERS: [&str; 2] = ["Instruction: Swap", "SwapEvent"];

/// Classification outcome for one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    PoolInit,
    Swap,
    /// Not an event this pipeline consumes - an explicit outcome, not a
    /// silent drop
    Other,
}

/// Classify a notification by its log lines. Pool-init markers win over
/// swap markers: the init transaction usually carries a swap-shaped line
/// for the initial deposit.
pub fn classify_logs(logs: &[String]) -> LogKind {
    if logs.iter().any(|line| POOL_INIT_MARKERS.iter().any(|m| line.contains(m))) {
        return LogKind::PoolInit;
    }
    if logs.iter().any(|line| SWAP_MARKERS.iter().any(|m| line.contains(m))) {
        return LogKind::Swap;
    }
    LogKind::Other
}

/// Enriched transfer data for one transaction signature
#[derive(Debug, Clone, Deserialize)]
pub struct TransferSummary {
    pub mint: String,
    pub symbol: Option<String>,
    /// Token amount moved, UI units
    pub token_amount: f64,
    /// SOL amount moved, UI units
    pub sol_amount: f64,
    pub timestamp: i64,
}

/// Seam for the signature-enrichment lookup
#[async_trait]
pub trait SignatureResolver: Send + Sync {
    async fn resolve(&self, signature: &str) -> PipelineResult<TransferSummary>;
}

/// HTTP resolver against the enrichment endpoint
pub struct HttpSignatureResolver {
    client: Arc<RateLimitedClient>,
    base_url: String,
}

impl HttpSignatureResolver {
    pub fn new(client: Arc<RateLimitedClient>, base_url: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl SignatureResolver for HttpSignatureResolver {
    async fn resolve(&self, signature: &str) -> PipelineResult<TransferSummary> {
        let url = format!("{}/transactions/{}", self.base_url, signature);
        let value = self.client.get_json(&url).await?;
        serde_json::from_value(value).map_err(|e| {
            PipelineError::unavailable(format!("bad enrichment payload for {}: {}", signature, e))
        })
    }
}

/// Adapter loop: notifications in, typed events out.
///
/// Runs until the notification channel closes. Swaps with non-positive
/// amounts are dropped here so the aggregator never sees an invalid trade.
pub async fn run_adapter(
    mut rx: mpsc::Receiver<LogNotification>,
    resolver: Arc<dyn SignatureResolver>,
    markets: Arc<MarketDataService>,
    tx: mpsc::Sender<PipelineEvent>,
) {
    log::info!("📡 Starting event source adapter");

    while let Some(notification) = rx.recv().await {
        let kind = classify_logs(&notification.logs);
        if kind == LogKind::Other {
            log::debug!("Skipping {}: no recognized markers", notification.signature);
            continue;
        }

        let summary = match resolver.resolve(&notification.signature).await {
            Ok(summary) => summary,
            Err(e) => {
                log::warn!("⚠️  Enrichment failed for {}: {}", notification.signature, e);
                continue;
            }
        };

        let event = match kind {
            LogKind::PoolInit => match pool_init_event(&summary, &markets).await {
                Ok(event) => PipelineEvent::PoolInit(event),
                Err(e) => {
                    log::warn!("⚠️  Pool init dropped ({}): {}", summary.mint, e);
                    continue;
                }
            },
            LogKind::Swap => match swap_event(&summary, &markets).await {
                Ok(Some(event)) => PipelineEvent::Swap(event),
                Ok(None) => {
                    log::debug!("Dropping degenerate swap for {} (zero amounts)", summary.mint);
                    continue;
                }
                Err(e) => {
                    log::warn!("⚠️  Swap dropped ({}): {}", summary.mint, e);
                    continue;
                }
            },
            LogKind::Other => unreachable!("filtered above"),
        };

        if tx.send(event).await.is_err() {
            log::warn!("⚠️  Pipeline channel closed, stopping adapter");
            break;
        }
    }

    log::info!("✅ Adapter stopped");
}

async fn pool_init_event(
    summary: &TransferSummary,
    markets: &MarketDataService,
) -> PipelineResult<PoolInitEvent> {
    // Initial liquidity estimate: both sides of the funding deposit are
    // worth roughly the SOL side, so 2x its USD value. Unpriceable SOL
    // leaves liquidity unknown rather than dropping the pool.
    let liquidity_usd = if summary.sol_amount > 0.0 {
        match markets.sol_usd().await {
            Ok(sol_usd) => Some(2.0 * summary.sol_amount * sol_usd),
            Err(e) => {
                log::debug!("SOL price unavailable for liquidity estimate: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(PoolInitEvent {
        mint: summary.mint.clone(),
        symbol: summary.symbol.clone(),
        liquidity_usd,
        timestamp: summary.timestamp,
    })
}

async fn swap_event(
    summary: &TransferSummary,
    markets: &MarketDataService,
) -> PipelineResult<Option<SwapEvent>> {
    if summary.token_amount <= 0.0 || summary.sol_amount <= 0.0 {
        return Ok(None);
    }

    // A swap cannot be normalized without the reference price; the caller
    // logs and skips the item
    let sol_usd = markets.sol_usd().await?;

    let volume_usd = summary.sol_amount * sol_usd;
    let price_usd = volume_usd / summary.token_amount;

    if price_usd <= 0.0 || !price_usd.is_finite() {
        return Ok(None);
    }

    Ok(Some(SwapEvent {
        mint: summary.mint.clone(),
        price_usd,
        volume_usd,
        timestamp: summary.timestamp,
    }))
}
