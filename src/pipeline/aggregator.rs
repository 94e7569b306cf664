//! Candle aggregator - converts swap events into candle upserts
//!
//! One trade, one upsert: the bucket is the trade timestamp truncated to
//! the aggregation interval, and the store's ON CONFLICT merge keeps the
//! OHLCV row consistent however trades interleave. Close follows arrival
//! order; the transport is assumed in-order within a bucket and late
//! out-of-order arrivals may shift the close (accepted).

use super::error::PipelineResult;
use super::store::TokenStore;
use super::types::PipelineEvent;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct CandleAggregator {
    store: Arc<TokenStore>,
    interval_secs: i64,
}

impl CandleAggregator {
    pub fn new(store: Arc<TokenStore>, interval_secs: i64) -> Self {
        assert!(interval_secs > 0, "candle interval must be positive");
        Self { store, interval_secs }
    }

    /// Bucket timestamp for a trade: epoch seconds truncated to the
    /// interval
    pub fn bucket_for(&self, trade_ts: i64) -> i64 {
        trade_ts - trade_ts.rem_euclid(self.interval_secs)
    }

    /// Merge one trade into its candle.
    ///
    /// Non-positive prices are not rejected here - the adapter filters
    /// invalid trades before they reach the channel.
    pub fn ingest(&self, mint: &str, price: f64, volume_usd: f64, trade_ts: i64) -> PipelineResult<()> {
        let bucket = self.bucket_for(trade_ts);
        self.store.upsert_trade(mint, bucket, price, volume_usd)
    }
}

/// Consume typed pipeline events from the adapter channel.
///
/// PoolInit → pool upsert (first_seen_ts set once), Swap → candle merge.
/// A failed item is logged and the loop continues; the loop ends when the
/// channel closes (adapter shutdown).
pub async fn run_event_ingestion(
    mut rx: mpsc::Receiver<PipelineEvent>,
    aggregator: Arc<CandleAggregator>,
    store: Arc<TokenStore>,
) {
    log::info!("🚀 Starting event ingestion");

    let mut swap_count = 0u64;
    let mut last_log_time = std::time::Instant::now();

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PoolInit(pool) => {
                if let Err(e) = store.upsert_pool(
                    &pool.mint,
                    pool.symbol.as_deref(),
                    pool.liquidity_usd,
                    None,
                    pool.timestamp,
                ) {
                    log::warn!("⚠️  Pool upsert failed for {}: {}", pool.mint, e);
                } else {
                    log::info!(
                        "🆕 Tracking pool {} (symbol: {})",
                        pool.mint,
                        pool.symbol.as_deref().unwrap_or("?")
                    );
                }
            }
            PipelineEvent::Swap(swap) => {
                if let Err(e) =
                    aggregator.ingest(&swap.mint, swap.price_usd, swap.volume_usd, swap.timestamp)
                {
                    log::warn!("⚠️  Candle merge failed for {}: {}", swap.mint, e);
                    continue;
                }

                swap_count += 1;
                if last_log_time.elapsed().as_secs() >= 10 {
                    let rate = swap_count as f64 / last_log_time.elapsed().as_secs_f64();
                    log::info!("📊 Ingestion rate: {:.1} swaps/sec", rate);
                    last_log_time = std::time::Instant::now();
                    swap_count = 0;
                }
            }
        }
    }

    log::info!("✅ Event ingestion stopped (channel closed)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{PoolInitEvent, SwapEvent};
    use tempfile::NamedTempFile;

    fn setup() -> (NamedTempFile, Arc<TokenStore>, CandleAggregator) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(TokenStore::open(temp_file.path().to_str().unwrap()).unwrap());
        let aggregator = CandleAggregator::new(store.clone(), 60);
        (temp_file, store, aggregator)
    }

    #[test]
    fn test_bucket_boundary() {
        let (_temp, _store, aggregator) = setup();
        let t = 1_700_000_040; // already a bucket start? 1_700_000_040 % 60 == 0

        assert_eq!(aggregator.bucket_for(t), t);
        // Last second of the bucket stays in it
        assert_eq!(aggregator.bucket_for(t + 59), t);
        // First second of the next interval rolls over
        assert_eq!(aggregator.bucket_for(t + 60), t + 60);
    }

    #[test]
    fn test_ingest_merges_within_bucket() {
        let (_temp, store, aggregator) = setup();
        let t = 1_700_000_040;

        aggregator.ingest("mint_a", 1.0, 100.0, t).unwrap();
        aggregator.ingest("mint_a", 1.6, 50.0, t + 20).unwrap();
        aggregator.ingest("mint_a", 0.9, 25.0, t + 59).unwrap();

        let candle = store.get_candle("mint_a", t).unwrap().unwrap();
        assert_eq!(candle.open, 1.0);
        assert_eq!(candle.high, 1.6);
        assert_eq!(candle.low, 0.9);
        assert_eq!(candle.close, 0.9); // last by arrival order
        assert_eq!(candle.volume, 175.0);
    }

    #[test]
    fn test_ingest_splits_across_buckets() {
        let (_temp, store, aggregator) = setup();
        let t = 1_700_000_040;

        aggregator.ingest("mint_a", 1.0, 100.0, t + 59).unwrap();
        aggregator.ingest("mint_a", 2.0, 100.0, t + 60).unwrap();

        assert!(store.get_candle("mint_a", t).unwrap().is_some());
        assert!(store.get_candle("mint_a", t + 60).unwrap().is_some());

        let first = store.get_candle("mint_a", t).unwrap().unwrap();
        assert_eq!(first.close, 1.0);
        assert_eq!(first.volume, 100.0);
    }

    #[test]
    fn test_mints_isolated() {
        let (_temp, store, aggregator) = setup();
        let t = 1_700_000_040;

        aggregator.ingest("mint_a", 1.0, 100.0, t).unwrap();
        aggregator.ingest("mint_b", 5.0, 10.0, t).unwrap();

        let a = store.get_candle("mint_a", t).unwrap().unwrap();
        let b = store.get_candle("mint_b", t).unwrap().unwrap();
        assert_eq!(a.close, 1.0);
        assert_eq!(b.close, 5.0);
    }

    #[tokio::test]
    async fn test_event_loop_routes_events() {
        let (_temp, store, aggregator) = setup();
        let aggregator = Arc::new(aggregator);
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(run_event_ingestion(rx, aggregator, store.clone()));

        tx.send(PipelineEvent::PoolInit(PoolInitEvent {
            mint: "mint_a".to_string(),
            symbol: Some("TEST".to_string()),
            liquidity_usd: Some(15_000.0),
            timestamp: 1_700_000_000,
        }))
        .await
        .unwrap();

        tx.send(PipelineEvent::Swap(SwapEvent {
            mint: "mint_a".to_string(),
            price_usd: 0.01,
            volume_usd: 250.0,
            timestamp: 1_700_000_055, // bucket 1_700_000_040
        }))
        .await
        .unwrap();

        drop(tx);
        handle.await.unwrap();

        let pool = store.get_pool("mint_a").unwrap().unwrap();
        assert_eq!(pool.symbol.as_deref(), Some("TEST"));
        assert_eq!(pool.liq_usd, Some(15_000.0));

        let candle = store.get_candle("mint_a", 1_700_000_040).unwrap().unwrap();
        assert_eq!(candle.close, 0.01);
        assert_eq!(candle.volume, 250.0);
    }
}
