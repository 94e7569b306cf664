//! Pipeline configuration from environment variables

use std::env;
use std::time::Duration;

use super::indicators::IndicatorParams;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Configuration for the pipeline runtime
///
/// Loaded from environment variables with sensible defaults. The indicator
/// window constraint (`min_window >= ema_long + 2`) is asserted at load time
/// so a bad reconfiguration fails at startup instead of producing undefined
/// cross comparisons mid-sweep.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Channel buffer size for pipeline events
    pub channel_buffer: usize,

    /// Candle aggregation interval (bucket width) in seconds
    pub candle_interval_secs: i64,

    /// Gap filler period in seconds (independent of the candle interval)
    pub gap_fill_interval_secs: u64,

    /// Stage A (detection) sweep period in seconds
    pub detect_interval_secs: u64,

    /// Stage B (notification) sweep period in seconds
    pub notify_interval_secs: u64,

    /// Retention cleanup period in seconds
    pub retention_interval_secs: u64,

    // Indicator window
    pub min_window: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,

    // Stage A thresholds
    pub vol_spike_min: f64,
    /// Reject tokens whose RSI is at or above this ceiling (already
    /// overheated by the time the cross prints)
    pub rsi_max: f64,
    pub min_pool_age_secs: i64,
    /// A token that already produced a signal this recently is not
    /// re-signaled by Stage A
    pub signal_cooldown_secs: i64,

    // Stage B gates
    pub min_liquidity_usd: f64,
    pub max_fdv_usd: f64,
    pub max_price_impact_pct: f64,
    /// Notional size (in SOL) of the hypothetical trade used for the
    /// price-impact probe
    pub impact_probe_sol: f64,

    // Retention horizons
    pub signal_retention_secs: i64,
    pub candle_retention_secs: i64,
    pub pool_idle_retention_secs: i64,

    // Market-data provider (batched prices + token catalog)
    pub market_api_url: String,
    pub market_min_interval: Duration,
    pub market_daily_quota: u32,

    // Quote provider (price impact + round-trip USD price)
    pub quote_api_url: String,
    pub quote_min_interval: Duration,
    pub quote_daily_quota: u32,

    // Signature enrichment provider
    pub enrich_api_url: String,
    pub enrich_min_interval: Duration,
    pub enrich_daily_quota: u32,

    /// Bounded retry count shared by the fetch clients
    pub fetch_retries: u32,

    // Notification sink
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    /// Master enable flag for the runtime binary
    pub enabled: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `SOLPULSE_DB_PATH` (default: /var/lib/solpulse/solpulse.db)
    /// - `EVENT_CHANNEL_BUFFER` (default: 10000)
    /// - `CANDLE_INTERVAL_SECS` (default: 60)
    /// - `GAP_FILL_INTERVAL_SECS` (default: 60)
    /// - `DETECT_INTERVAL_SECS` (default: 60)
    /// - `NOTIFY_INTERVAL_SECS` (default: 20)
    /// - `MIN_WINDOW` / `EMA_SHORT` / `EMA_LONG` / `RSI_PERIOD`
    /// - `VOL_SPIKE_MIN` / `RSI_MAX` / `MIN_POOL_AGE_SECS`
    /// - `MIN_LIQUIDITY_USD` / `MAX_FDV_USD` / `MAX_PRICE_IMPACT_PCT`
    /// - `MARKET_API_URL` / `QUOTE_API_URL` / `ENRICH_API_URL` + per-provider
    ///   `*_MIN_INTERVAL_MS` and `*_DAILY_QUOTA`
    /// - `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`
    /// - `ENABLE_PIPELINE` (default: false)
    pub fn from_env() -> Self {
        let config = Self {
            db_path: env::var("SOLPULSE_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/solpulse/solpulse.db".to_string()),

            channel_buffer: env_parse("EVENT_CHANNEL_BUFFER", 10_000),

            candle_interval_secs: env_parse("CANDLE_INTERVAL_SECS", 60),
            gap_fill_interval_secs: env_parse("GAP_FILL_INTERVAL_SECS", 60),
            detect_interval_secs: env_parse("DETECT_INTERVAL_SECS", 60),
            notify_interval_secs: env_parse("NOTIFY_INTERVAL_SECS", 20),
            retention_interval_secs: env_parse("RETENTION_INTERVAL_SECS", 3_600),

            min_window: env_parse("MIN_WINDOW", 40),
            ema_short: env_parse("EMA_SHORT", 9),
            ema_long: env_parse("EMA_LONG", 21),
            rsi_period: env_parse("RSI_PERIOD", 14),

            vol_spike_min: env_parse("VOL_SPIKE_MIN", 3.0),
            rsi_max: env_parse("RSI_MAX", 70.0),
            min_pool_age_secs: env_parse("MIN_POOL_AGE_SECS", 1_800),
            signal_cooldown_secs: env_parse("SIGNAL_COOLDOWN_SECS", 3_600),

            min_liquidity_usd: env_parse("MIN_LIQUIDITY_USD", 10_000.0),
            max_fdv_usd: env_parse("MAX_FDV_USD", 5_000_000.0),
            max_price_impact_pct: env_parse("MAX_PRICE_IMPACT_PCT", 5.0),
            impact_probe_sol: env_parse("IMPACT_PROBE_SOL", 0.5),

            signal_retention_secs: env_parse("SIGNAL_RETENTION_SECS", 86_400),
            candle_retention_secs: env_parse("CANDLE_RETENTION_SECS", 86_400),
            pool_idle_retention_secs: env_parse("POOL_IDLE_RETENTION_SECS", 604_800),

            market_api_url: env::var("MARKET_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            market_min_interval: Duration::from_millis(env_parse("MARKET_MIN_INTERVAL_MS", 6_000)),
            market_daily_quota: env_parse("MARKET_DAILY_QUOTA", 10_000),

            quote_api_url: env::var("QUOTE_API_URL")
                .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string()),
            quote_min_interval: Duration::from_millis(env_parse("QUOTE_MIN_INTERVAL_MS", 1_000)),
            quote_daily_quota: env_parse("QUOTE_DAILY_QUOTA", 50_000),

            enrich_api_url: env::var("ENRICH_API_URL")
                .unwrap_or_else(|_| "https://api.helius.xyz/v0".to_string()),
            enrich_min_interval: Duration::from_millis(env_parse("ENRICH_MIN_INTERVAL_MS", 200)),
            enrich_daily_quota: env_parse("ENRICH_DAILY_QUOTA", 100_000),

            fetch_retries: env_parse("FETCH_RETRIES", 2),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            enabled: env_parse("ENABLE_PIPELINE", false),
        };

        // Fails fast on a window too short for the cross comparison
        config.indicator_params();

        config
    }

    /// Indicator engine parameters derived from this config.
    ///
    /// Panics if `min_window < ema_long + 2` (the bullish-cross check needs
    /// two defined points of the longer EMA).
    pub fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams::new(self.ema_short, self.ema_long, self.rsi_period, self.min_window)
    }
}
