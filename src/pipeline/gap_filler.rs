//! Gap filler - keeps every tracked token's candle series contiguous
//!
//! Indicator recurrences assume evenly spaced buckets; an idle token would
//! otherwise hand the engine a sparse series and the EMA/RSI math would
//! silently run over wrong spacing. Each cycle this job synthesizes a
//! zero-volume candle for every tracked token that saw no trade in the
//! current bucket.
//!
//! Fill price priority:
//! 1. close of the token's most recent candle, regardless of age
//! 2. symbol-keyed reference price from the market-data provider (batched,
//!    rate-limited) - a deliberately weak join, the provider does not index
//!    this network's mints
//! Neither → the token is skipped this cycle with an explicit reason.

use super::error::{PipelineError, PipelineResult};
use super::markets::MarketDataService;
use super::store::TokenStore;
use super::types::SkipReason;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Aggregate counts for one gap-fill cycle
#[derive(Debug, Default, Clone)]
pub struct GapFillReport {
    /// Tokens examined
    pub processed: usize,
    /// Zero-volume candles inserted
    pub synthesized: usize,
    /// Fills that needed an external reference price
    pub price_fetched: usize,
    /// Tokens skipped, with reasons
    pub skipped: Vec<(String, SkipReason)>,
}

pub struct GapFiller {
    store: Arc<TokenStore>,
    markets: Arc<MarketDataService>,
    candle_interval_secs: i64,
}

impl GapFiller {
    pub fn new(store: Arc<TokenStore>, markets: Arc<MarketDataService>, candle_interval_secs: i64) -> Self {
        Self { store, markets, candle_interval_secs }
    }

    fn current_bucket(&self, now: i64) -> i64 {
        now - now.rem_euclid(self.candle_interval_secs)
    }

    /// One gap-fill pass over all tracked tokens.
    ///
    /// Per-token failures are recorded and the batch continues; only a
    /// failure to even list the tracked tokens aborts the cycle.
    pub async fn run_cycle(&self, now: i64) -> PipelineResult<GapFillReport> {
        let bucket = self.current_bucket(now);
        let mints = self.store.tracked_mints()?;

        let mut report = GapFillReport::default();
        // Tokens with no candle history at all: resolved via the batched
        // symbol lookup after the first pass
        let mut need_price: Vec<(String, String)> = Vec::new(); // (mint, symbol)

        for mint in mints {
            report.processed += 1;

            match self.fill_from_history(&mint, bucket) {
                Ok(FillOutcome::AlreadyCurrent) => {
                    report.skipped.push((mint, SkipReason::AlreadyCurrent));
                }
                Ok(FillOutcome::Filled) => {
                    report.synthesized += 1;
                }
                Ok(FillOutcome::NeedsReferencePrice) => {
                    match self.store.get_pool(&mint) {
                        Ok(Some(pool)) => match pool.symbol {
                            Some(symbol) => need_price.push((mint, symbol)),
                            None => report.skipped.push((mint, SkipReason::NoPriceSource)),
                        },
                        Ok(None) => report.skipped.push((mint, SkipReason::NoPriceSource)),
                        Err(e) => {
                            log::warn!("⚠️  Pool lookup failed for {}: {}", mint, e);
                            report.skipped.push((mint, SkipReason::NoPriceSource));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("⚠️  Gap fill failed for {}: {}", mint, e);
                    report.skipped.push((mint, SkipReason::NoPriceSource));
                }
            }
        }

        if !need_price.is_empty() {
            self.fill_from_reference(&need_price, bucket, now, &mut report).await;
        }

        Ok(report)
    }

    fn fill_from_history(&self, mint: &str, bucket: i64) -> PipelineResult<FillOutcome> {
        if self.store.candle_exists(mint, bucket)? {
            return Ok(FillOutcome::AlreadyCurrent);
        }

        match self.store.latest_close(mint)? {
            Some(close) if close > 0.0 => {
                self.store.insert_gap_candle(mint, bucket, close)?;
                Ok(FillOutcome::Filled)
            }
            // A non-positive close never comes from a real trade, but a
            // poisoned row must not propagate into synthetic candles
            Some(_) => Ok(FillOutcome::NeedsReferencePrice),
            None => Ok(FillOutcome::NeedsReferencePrice),
        }
    }

    /// Resolve fill prices for history-less tokens via one batched,
    /// symbol-keyed reference fetch
    async fn fill_from_reference(
        &self,
        need_price: &[(String, String)],
        bucket: i64,
        now: i64,
        report: &mut GapFillReport,
    ) {
        let symbols: Vec<String> = need_price.iter().map(|(_, s)| s.clone()).collect();

        let prices = match self.markets.prices_by_symbol(&symbols).await {
            Ok(prices) => prices,
            Err(PipelineError::QuotaExceeded(provider)) => {
                log::warn!("🚦 Reference fetch skipped, {} quota exhausted", provider);
                for (mint, _) in need_price {
                    report.skipped.push((mint.clone(), SkipReason::QuotaExhausted));
                }
                return;
            }
            Err(e) => {
                log::warn!("⚠️  Reference price fetch failed: {}", e);
                for (mint, _) in need_price {
                    report.skipped.push((mint.clone(), SkipReason::PriceUnavailable));
                }
                return;
            }
        };

        let mut fetched: HashMap<&str, f64> = HashMap::new();
        for (symbol, ticker) in &prices {
            fetched.insert(symbol.as_str(), ticker.usd);
        }

        for (mint, symbol) in need_price {
            match fetched.get(symbol.as_str()) {
                Some(&price) if price > 0.0 => {
                    match self.store.insert_gap_candle(mint, bucket, price) {
                        Ok(true) => {
                            report.synthesized += 1;
                            report.price_fetched += 1;
                            if let Err(e) = self.store.record_reference_price(symbol, price, now) {
                                log::warn!("⚠️  Reference price not recorded for {}: {}", symbol, e);
                            }
                        }
                        // A trade landed while we were fetching; its candle
                        // wins
                        Ok(false) => {
                            report.skipped.push((mint.clone(), SkipReason::AlreadyCurrent));
                        }
                        Err(e) => {
                            log::warn!("⚠️  Gap candle insert failed for {}: {}", mint, e);
                            report.skipped.push((mint.clone(), SkipReason::PriceUnavailable));
                        }
                    }

                    // The provider also knows the market cap; refresh the
                    // pool's valuation while we have it (keep-existing
                    // semantics make this safe)
                    if let Some(ticker) = prices.get(symbol.as_str()) {
                        if let Err(e) =
                            self.store.upsert_pool(mint, Some(symbol), None, ticker.market_cap, now)
                        {
                            log::warn!("⚠️  Pool valuation refresh failed for {}: {}", mint, e);
                        }
                    }
                }
                _ => {
                    report.skipped.push((mint.clone(), SkipReason::PriceUnavailable));
                }
            }
        }
    }
}

enum FillOutcome {
    AlreadyCurrent,
    Filled,
    NeedsReferencePrice,
}

/// Periodic gap-fill loop. A failed cycle raises an operational alert
/// through the sink and the next tick proceeds normally.
pub async fn gap_filler_task(
    filler: Arc<GapFiller>,
    alerts: Arc<dyn super::notify::Notifier>,
    period_secs: u64,
) {
    log::info!("⏰ Starting gap filler (period: {}s)", period_secs);
    let mut timer = interval(Duration::from_secs(period_secs));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();

        match filler.run_cycle(now).await {
            Ok(report) => {
                log::info!(
                    "🕳️  Gap fill: {} processed, {} synthesized ({} via reference price), {} skipped",
                    report.processed,
                    report.synthesized,
                    report.price_fetched,
                    report.skipped.len()
                );
                for (mint, reason) in &report.skipped {
                    if *reason != SkipReason::AlreadyCurrent {
                        log::debug!("   ├─ {} skipped: {}", mint, reason);
                    }
                }
            }
            Err(e) => {
                log::error!("❌ Gap fill cycle failed: {}", e);
                let _ = alerts.send(&format!("⚠️ gap fill cycle failed: {}", e)).await;
            }
        }
    }
}
