//! # Real-time candle & buy-signal pipeline
//!
//! Converts a classified stream of on-chain trade events into fixed-interval
//! OHLCV candles, keeps every tracked token's series contiguous, derives
//! indicators over candle windows, and emits a deduplicated stream of buy
//! notifications.
//!
//! ## Architecture
//!
//! ```text
//! LogNotification (subscription feed)
//!     ↓  adapter (classify + enrich + normalize)
//! PipelineEvent channel (PoolInit | Swap)
//!     ↓  aggregator (bucket merge upsert)
//! TokenStore (SQLite) ⇄ gap_filler (periodic synthesis)
//!     ↓  indicators (pure EMA/RSI/spike over windows)
//! signals Stage A (detect) → signals Stage B (gate + deliver once)
//!     ↓
//! notify (fire-and-forget sink) + notified flag write
//! ```
//!
//! Everything runs as independently-ticking tokio tasks over one shared
//! store; per-item failures never abort a cycle.
//!
//! ## Module organization
//!
//! - `types` - core data structures (events, candle, pool, signal)
//! - `error` - failure taxonomy with per-class handling policy
//! - `config` - env-driven runtime configuration
//! - `store` - SQLite persistence (atomic candle merge, FIFO signal queue)
//! - `fetch` - per-provider rate-limited HTTP client + TTL cache
//! - `markets` - batched reference prices, symbol catalog, SOL/USD
//! - `quotes` - price-impact probes and round-trip USD pricing
//! - `notify` - outbound delivery sink
//! - `indicators` - pure indicator math over candle windows
//! - `aggregator` - trade → candle merge + event-channel ingestion
//! - `gap_filler` - zero-volume candle synthesis for idle tokens
//! - `adapter` - log classification and enrichment into typed events
//! - `signals` - two-stage detection/notification cascade

pub mod adapter;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gap_filler;
pub mod indicators;
pub mod markets;
pub mod notify;
pub mod quotes;
pub mod signals;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use aggregator::CandleAggregator;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use store::TokenStore;
pub use types::{BuySignal, Candle, LogNotification, PipelineEvent, PoolRecord, SkipReason};
