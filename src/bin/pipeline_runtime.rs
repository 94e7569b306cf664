//! Pipeline runtime - production binary
//!
//! Assembles the full pipeline:
//! - SQLite store (schema setup, signals table recreated)
//! - rate-limited provider clients (market data, quotes, enrichment)
//! - adapter + aggregator over the event channel
//! - periodic tasks: gap filler, Stage A detector, Stage B notifier,
//!   retention
//!
//! The subscription feed is delivered on stdin as newline-delimited JSON
//! `{"signature": "...", "logs": ["...", ...]}` objects, one per
//! notification - the upstream socket client stays outside this process.
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Environment variables: see `pipeline::config::PipelineConfig`.

use dotenv::dotenv;
use log::{error, info, warn};
use solpulse::pipeline::{
    adapter::{run_adapter, HttpSignatureResolver, SignatureResolver},
    aggregator::{run_event_ingestion, CandleAggregator},
    config::PipelineConfig,
    fetch::{system_clock, ProviderLimits, RateLimitedClient, ReqwestTransport},
    gap_filler::{gap_filler_task, GapFiller},
    markets::MarketDataService,
    notify::{LogNotifier, Notifier, TelegramNotifier},
    quotes::{HttpQuoteClient, QuoteProvider},
    signals::{
        detector_task, notifier_task, DeliveryGates, DetectionThresholds, SignalDetector,
        SignalNotifier,
    },
    store::{retention_task, RetentionPolicy, TokenStore},
    types::LogNotification,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    // NOTE: Workaround for rustls issue
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Can't set crypto provider to aws_lc_rs");

    info!("🚀 SolPulse pipeline runtime");

    let config = PipelineConfig::from_env();

    if !config.enabled {
        info!("⚠️  Pipeline is DISABLED (set ENABLE_PIPELINE=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    info!("✅ Pipeline ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Candle interval: {}s", config.candle_interval_secs);
    info!("   ├─ Gap fill period: {}s", config.gap_fill_interval_secs);
    info!("   ├─ Detect period: {}s", config.detect_interval_secs);
    info!("   ├─ Notify period: {}s", config.notify_interval_secs);
    info!("   └─ Channel buffer: {} events", config.channel_buffer);

    // Store: a startup failure is fatal after bounded retries
    info!("🔧 Initializing store...");
    let store = Arc::new(TokenStore::open_with_retries(&config.db_path, 3).await?);
    info!("✅ Store initialized");

    // One rate-limited client per provider, sharing a transport
    let clock = system_clock();
    let transport = Arc::new(ReqwestTransport::new());

    let market_client = Arc::new(RateLimitedClient::new(
        ProviderLimits::new(
            "market",
            config.market_min_interval,
            config.market_daily_quota,
            config.fetch_retries,
        ),
        transport.clone(),
        clock.clone(),
    ));
    let quote_client = Arc::new(RateLimitedClient::new(
        ProviderLimits::new(
            "quote",
            config.quote_min_interval,
            config.quote_daily_quota,
            config.fetch_retries,
        ),
        transport.clone(),
        clock.clone(),
    ));
    let enrich_client = Arc::new(RateLimitedClient::new(
        ProviderLimits::new(
            "enrich",
            config.enrich_min_interval,
            config.enrich_daily_quota,
            config.fetch_retries,
        ),
        transport,
        clock.clone(),
    ));

    let markets = Arc::new(MarketDataService::new(
        market_client,
        &config.market_api_url,
        clock.clone(),
    ));
    let quotes: Arc<dyn QuoteProvider> =
        Arc::new(HttpQuoteClient::new(quote_client, &config.quote_api_url));
    let resolver: Arc<dyn SignatureResolver> =
        Arc::new(HttpSignatureResolver::new(enrich_client, &config.enrich_api_url));

    let sink: Arc<dyn Notifier> =
        match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                info!("📣 Notification sink: Telegram chat {}", chat_id);
                Arc::new(TelegramNotifier::new(token, chat_id))
            }
            _ => {
                warn!("⚠️  TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID unset, notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

    // Channels: feed → adapter → aggregator
    let (log_tx, log_rx) = mpsc::channel::<LogNotification>(config.channel_buffer);
    let (event_tx, event_rx) = mpsc::channel(config.channel_buffer);

    let aggregator = Arc::new(CandleAggregator::new(store.clone(), config.candle_interval_secs));

    tokio::spawn(run_adapter(log_rx, resolver, markets.clone(), event_tx));
    tokio::spawn(run_event_ingestion(event_rx, aggregator, store.clone()));

    let gap_filler = Arc::new(GapFiller::new(
        store.clone(),
        markets.clone(),
        config.candle_interval_secs,
    ));
    tokio::spawn(gap_filler_task(gap_filler, sink.clone(), config.gap_fill_interval_secs));

    let detector = Arc::new(SignalDetector::new(
        store.clone(),
        config.indicator_params(),
        DetectionThresholds::from_config(&config),
    ));
    tokio::spawn(detector_task(detector, sink.clone(), config.detect_interval_secs));

    let stage_b = Arc::new(SignalNotifier::new(
        store.clone(),
        quotes,
        sink.clone(),
        DeliveryGates::from_config(&config),
    ));
    tokio::spawn(notifier_task(stage_b, sink.clone(), config.notify_interval_secs));

    tokio::spawn(retention_task(
        store.clone(),
        config.retention_interval_secs,
        RetentionPolicy {
            signal_retention_secs: config.signal_retention_secs,
            candle_retention_secs: config.candle_retention_secs,
            pool_idle_retention_secs: config.pool_idle_retention_secs,
        },
    ));

    info!("✅ All tasks spawned, reading feed from stdin...");

    // Feed reader: one JSON notification per line
    let feed = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LogNotification>(line) {
                        Ok(notification) => {
                            if log_tx.send(notification).await.is_err() {
                                warn!("⚠️  Adapter channel closed, stopping feed reader");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("⚠️  Malformed feed line skipped: {}", e);
                        }
                    }
                }
                Ok(None) => {
                    info!("Feed reached EOF");
                    break;
                }
                Err(e) => {
                    error!("❌ Feed read error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = feed => {
            info!("Feed closed, draining remaining work...");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }

    Ok(())
}
