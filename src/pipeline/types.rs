//! Core data structures shared across the pipeline
//!
//! Everything keyed by `mint`: the opaque token identifier on the network.
//! Candle rows map 1:1 onto the `candles` table, pool records onto `pools`,
//! and `BuySignal` onto `signals` (see `store::init_schema`).

use serde::{Deserialize, Serialize};

/// Raw notification from the subscription feed: a transaction signature
/// plus the log lines emitted by the transaction.
///
/// The adapter classifies these into pool-init / swap / noise before any
/// enrichment lookup happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogNotification {
    pub signature: String,
    pub logs: Vec<String>,
}

/// Typed event published by the adapter onto the pipeline channel.
///
/// Explicit message passing instead of handler callbacks: the adapter's
/// reconnection concerns stay on its side of the channel, the aggregation
/// path is testable with a plain `mpsc::Sender`.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PoolInit(PoolInitEvent),
    Swap(SwapEvent),
}

/// A new pool observed for the first time (or re-observed)
#[derive(Debug, Clone)]
pub struct PoolInitEvent {
    pub mint: String,
    pub symbol: Option<String>,
    /// Initial liquidity estimated from the pool funding amounts, when the
    /// enrichment lookup exposes them
    pub liquidity_usd: Option<f64>,
    pub timestamp: i64,
}

/// A normalized swap: price and volume already converted to USD
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub mint: String,
    pub price_usd: f64,
    pub volume_usd: f64,
    pub timestamp: i64,
}

/// One OHLCV row: token × time bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub mint: String,
    /// Epoch seconds truncated to the aggregation interval
    pub bucket_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// USD volume, additive across merges; 0 for gap-filled candles
    pub volume: f64,
}

/// Tracked pool row
#[derive(Debug, Clone)]
pub struct PoolRecord {
    pub mint: String,
    pub symbol: Option<String>,
    /// Set once at first observation, never updated
    pub first_seen_ts: i64,
    pub liq_usd: Option<f64>,
    pub fdv_usd: Option<f64>,
}

/// A candidate buy event produced by Stage A of the signal cascade
#[derive(Debug, Clone)]
pub struct BuySignal {
    pub id: i64,
    pub mint: String,
    pub signal_ts: i64,
    pub ema_cross: bool,
    pub vol_spike: f64,
    pub rsi: f64,
    pub notified: bool,
}

/// Indicator values computed over one candle window. Ephemeral, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub ema_short: f64,
    pub ema_long: f64,
    pub rsi: f64,
    pub volume_spike: f64,
    pub bullish_cross: bool,
}

/// Named outcome for every item the pipeline declines to act on.
///
/// Skips used to be silent in this kind of pipeline; naming them lets tests
/// assert on the reason instead of on absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Gap filler: a candle already exists for the current bucket
    AlreadyCurrent,
    /// Gap filler: no prior candle and no reference price resolved
    NoPriceSource,
    /// A provider's daily quota is exhausted for this cycle
    QuotaExhausted,
    /// The external source did not return a price for this token
    PriceUnavailable,
    /// Stage B: signal's pool row is missing
    PoolMissing,
    /// Stage B: liquidity below minimum (or unknown)
    LowLiquidity,
    /// Stage B: fully-diluted valuation above maximum
    ExcessiveValuation,
    /// Stage B: quote endpoint gave no usable quote
    QuoteUnavailable,
    /// Stage B: price impact of the probe trade above threshold
    PriceImpactTooHigh,
    /// Stage B: outbound delivery failed; retried next cycle
    DeliveryFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyCurrent => "ALREADY_CURRENT",
            SkipReason::NoPriceSource => "NO_PRICE_SOURCE",
            SkipReason::QuotaExhausted => "QUOTA_EXHAUSTED",
            SkipReason::PriceUnavailable => "PRICE_UNAVAILABLE",
            SkipReason::PoolMissing => "POOL_MISSING",
            SkipReason::LowLiquidity => "LOW_LIQUIDITY",
            SkipReason::ExcessiveValuation => "EXCESSIVE_VALUATION",
            SkipReason::QuoteUnavailable => "QUOTE_UNAVAILABLE",
            SkipReason::PriceImpactTooHigh => "PRICE_IMPACT_TOO_HIGH",
            SkipReason::DeliveryFailed => "DELIVERY_FAILED",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Candle {
    /// Zero-volume candle synthesized by the gap filler
    pub fn flat(mint: &str, bucket_ts: i64, price: f64) -> Self {
        Self {
            mint: mint.to_string(),
            bucket_ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// OHLC consistency check enforced after every merge
    pub fn is_well_formed(&self) -> bool {
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        self.high >= body_high && self.low <= body_low && self.volume >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_candle_is_well_formed() {
        let c = Candle::flat("mint_a", 1_700_000_040, 0.0042);
        assert_eq!(c.open, c.close);
        assert_eq!(c.high, c.low);
        assert_eq!(c.volume, 0.0);
        assert!(c.is_well_formed());
    }

    #[test]
    fn test_well_formed_rejects_inverted_range() {
        let c = Candle {
            mint: "m".to_string(),
            bucket_ts: 0,
            open: 2.0,
            high: 1.5, // below the open
            low: 1.0,
            close: 1.2,
            volume: 10.0,
        };
        assert!(!c.is_well_formed());
    }

    #[test]
    fn test_log_notification_roundtrip() {
        let n = LogNotification {
            signature: "5VERYl0ngSig".to_string(),
            logs: vec!["Program log: Instruction: Swap".to_string()],
        };
        let json = serde_json::to_string(&n).unwrap();
        let back: LogNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signature, n.signature);
        assert_eq!(back.logs.len(), 1);
    }
}
