//! End-to-end tests for the candle → indicator → signal pipeline
//!
//! Exercises the full path with a real (temp-file) SQLite store and
//! scripted quote/notification collaborators: seeded candle history must
//! produce exactly one Stage A signal, and Stage B must deliver it exactly
//! once through the liquidity/valuation/impact gates.

use async_trait::async_trait;
use solpulse::pipeline::aggregator::{run_event_ingestion, CandleAggregator};
use solpulse::pipeline::error::PipelineResult;
use solpulse::pipeline::indicators::IndicatorParams;
use solpulse::pipeline::notify::Notifier;
use solpulse::pipeline::quotes::{Quote, QuoteProvider, USD_REFERENCE_MINT};
use solpulse::pipeline::signals::{
    DeliveryGates, DetectionThresholds, SignalDetector, SignalNotifier,
};
use solpulse::pipeline::store::TokenStore;
use solpulse::pipeline::types::{PipelineEvent, PoolInitEvent, SwapEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

/// Quote source scripted to return a fixed price impact
struct MockQuotes {
    impact: f64,
}

#[async_trait]
impl QuoteProvider for MockQuotes {
    async fn quote(
        &self,
        _input_mint: &str,
        output_mint: &str,
        amount: f64,
        _slippage_bps: u16,
    ) -> PipelineResult<Quote> {
        if output_mint == USD_REFERENCE_MINT {
            // Round-trip USD pricing path
            Ok(Quote { out_amount: 0.85 * amount, price_impact_pct: 0.0 })
        } else {
            Ok(Quote { out_amount: 1_000.0 * amount, price_impact_pct: self.impact })
        }
    }
}

/// Notification sink that records every delivery
#[derive(Default)]
struct CountingSink {
    sent: Mutex<Vec<String>>,
    calls: AtomicU32,
}

#[async_trait]
impl Notifier for CountingSink {
    async fn send(&self, text: &str) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn open_store() -> (NamedTempFile, Arc<TokenStore>) {
    let temp_file = NamedTempFile::new().unwrap();
    let store = Arc::new(TokenStore::open(temp_file.path().to_str().unwrap()).unwrap());
    (temp_file, store)
}

/// 40 one-minute candles ending at `end_ts`: three flat bars, a 29-bar
/// decline, then an 8-bar recovery that completes the EMA9/EMA21 cross on
/// the final bar. Volume in the last 5 buckets is 4x the prior 30-bucket
/// average.
fn seed_candles(store: &TokenStore, mint: &str, end_ts: i64) {
    let mut closes = vec![1.0, 1.0, 1.0];
    for _ in 0..29 {
        closes.push(closes[closes.len() - 1] - 0.01);
    }
    for _ in 0..8 {
        closes.push(closes[closes.len() - 1] + 0.02);
    }
    assert_eq!(closes.len(), 40);

    for (i, close) in closes.iter().enumerate() {
        let bucket = end_ts - (39 - i as i64) * 60;
        let volume = if i >= 35 { 400.0 } else { 100.0 };
        store.upsert_trade(mint, bucket, *close, volume).unwrap();
    }
}

#[tokio::test]
async fn test_end_to_end_signal_lifecycle() {
    let (_temp, store) = open_store();
    let now = 1_700_000_040;
    let mint = "E2eMintAddr1111111111111111111111111111111";

    // Pool: old enough, liquidity $20k, FDV $1M
    store
        .upsert_pool(mint, Some("E2E"), Some(20_000.0), Some(1_000_000.0), now - 86_400)
        .unwrap();
    seed_candles(&store, mint, now);

    // Stage A: exactly one signal from the seeded window
    let detector = SignalDetector::new(
        store.clone(),
        IndicatorParams::default(),
        DetectionThresholds {
            vol_spike_min: 3.0,
            rsi_max: 70.0,
            min_pool_age_secs: 1_800,
            signal_cooldown_secs: 3_600,
        },
    );

    let report = detector.run_sweep(now).await.unwrap();
    assert_eq!(report.triggered, 1, "expected exactly one signal: {:?}", report);

    let pending = store.unnotified_signals().unwrap();
    assert_eq!(pending.len(), 1);
    let signal = &pending[0];
    assert_eq!(signal.mint, mint);
    assert!(signal.ema_cross);
    assert!((signal.vol_spike - 4.0).abs() < 1e-9);
    assert!(!signal.notified);

    // A second Stage A sweep does not duplicate the signal
    let report = detector.run_sweep(now + 60).await.unwrap();
    assert_eq!(report.triggered, 0);
    assert_eq!(store.unnotified_signals().unwrap().len(), 1);

    // Stage B: 1% mocked impact passes the 5% gate, sink invoked exactly
    // once, notified flipped
    let sink = Arc::new(CountingSink::default());
    let stage_b = SignalNotifier::new(
        store.clone(),
        Arc::new(MockQuotes { impact: 1.0 }),
        sink.clone(),
        DeliveryGates {
            min_liquidity_usd: 10_000.0,
            max_fdv_usd: 5_000_000.0,
            max_price_impact_pct: 5.0,
            impact_probe_sol: 0.5,
        },
    );

    let report = stage_b.run_sweep(now + 80).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

    let message = &sink.sent.lock().unwrap()[0];
    assert!(message.contains(mint));
    assert!(message.contains("BUY SIGNAL"));

    // Dedup across cycles: the signal stays delivered-once forever
    for i in 1..=3 {
        let report = stage_b.run_sweep(now + 80 + i * 20).await.unwrap();
        assert_eq!(report.scanned, 0);
    }
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stage_b_holds_until_liquidity_known() {
    let (_temp, store) = open_store();
    let now = 1_700_000_040;
    let mint = "HeldMintAddr111111111111111111111111111111";

    // Pool exists but liquidity was never observed
    store.upsert_pool(mint, None, None, None, now - 86_400).unwrap();
    store.insert_signal(mint, now, true, 4.0, 55.0).unwrap();

    let sink = Arc::new(CountingSink::default());
    let stage_b = SignalNotifier::new(
        store.clone(),
        Arc::new(MockQuotes { impact: 1.0 }),
        sink.clone(),
        DeliveryGates {
            min_liquidity_usd: 10_000.0,
            max_fdv_usd: 5_000_000.0,
            max_price_impact_pct: 5.0,
            impact_probe_sol: 0.5,
        },
    );

    // Held (not deleted) while liquidity is unknown
    let report = stage_b.run_sweep(now).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(store.unnotified_signals().unwrap().len(), 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

    // Liquidity observed later → delivered on a subsequent cycle
    store.upsert_pool(mint, None, Some(30_000.0), None, now + 10).unwrap();
    let report = stage_b.run_sweep(now + 20).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_event_channel_to_candle_store() {
    // Typed events flow from a mock producer through the channel into
    // candles and pools, the aggregation path never touching a socket
    let (_temp, store) = open_store();
    let aggregator = Arc::new(CandleAggregator::new(store.clone(), 60));

    let (tx, rx) = mpsc::channel::<PipelineEvent>(64);
    let ingestion = tokio::spawn(run_event_ingestion(rx, aggregator, store.clone()));

    let mint = "ChanMintAddr111111111111111111111111111111";
    let base = 1_700_000_040;

    tx.send(PipelineEvent::PoolInit(PoolInitEvent {
        mint: mint.to_string(),
        symbol: Some("CHAN".to_string()),
        liquidity_usd: Some(12_000.0),
        timestamp: base,
    }))
    .await
    .unwrap();

    // Three swaps in one bucket, one in the next
    for (price, volume, offset) in
        [(1.0, 100.0, 0), (1.4, 50.0, 20), (0.8, 30.0, 59), (1.1, 10.0, 60)]
    {
        tx.send(PipelineEvent::Swap(SwapEvent {
            mint: mint.to_string(),
            price_usd: price,
            volume_usd: volume,
            timestamp: base + offset,
        }))
        .await
        .unwrap();
    }

    drop(tx);
    ingestion.await.unwrap();

    let first = store.get_candle(mint, base).unwrap().unwrap();
    assert_eq!(first.open, 1.0);
    assert_eq!(first.high, 1.4);
    assert_eq!(first.low, 0.8);
    assert_eq!(first.close, 0.8);
    assert_eq!(first.volume, 180.0);
    assert!(first.is_well_formed());

    let second = store.get_candle(mint, base + 60).unwrap().unwrap();
    assert_eq!(second.open, 1.1);
    assert_eq!(second.volume, 10.0);

    let pool = store.get_pool(mint).unwrap().unwrap();
    assert_eq!(pool.symbol.as_deref(), Some("CHAN"));
    assert_eq!(pool.first_seen_ts, base);
}
