//! Signal cascade - two-stage filter from indicator output to a
//! notified-once buy signal
//!
//! Stage A (detection, short period): sweeps tracked tokens old enough to
//! trust, runs the indicator engine over their candle window, and persists
//! a signal row when ALL thresholds line up (bullish EMA cross, volume
//! spike, RSI under the ceiling). Reads only candles and pool age - no
//! external pricing calls on this path.
//!
//! Stage B (notification, shorter period): drains unnotified signals in
//! FIFO order through the liquidity / valuation / price-impact gates, then
//! delivers and flips `notified` exactly once. A rejected signal stays in
//! the queue and is retried every cycle until it passes or ages out -
//! eventually-deliver-or-expire, not a hard failure.

use super::config::PipelineConfig;
use super::error::{PipelineError, PipelineResult};
use super::indicators::{self, IndicatorParams};
use super::notify::Notifier;
use super::quotes::{self, QuoteProvider};
use super::store::TokenStore;
use super::types::{BuySignal, SkipReason};
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Stage A thresholds
#[derive(Debug, Clone, Copy)]
pub struct DetectionThresholds {
    pub vol_spike_min: f64,
    /// RSI at or above this means the move is already overheated
    pub rsi_max: f64,
    pub min_pool_age_secs: i64,
    pub signal_cooldown_secs: i64,
}

/// Stage B gates
#[derive(Debug, Clone, Copy)]
pub struct DeliveryGates {
    pub min_liquidity_usd: f64,
    pub max_fdv_usd: f64,
    pub max_price_impact_pct: f64,
    pub impact_probe_sol: f64,
}

impl DetectionThresholds {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            vol_spike_min: config.vol_spike_min,
            rsi_max: config.rsi_max,
            min_pool_age_secs: config.min_pool_age_secs,
            signal_cooldown_secs: config.signal_cooldown_secs,
        }
    }
}

impl DeliveryGates {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_liquidity_usd: config.min_liquidity_usd,
            max_fdv_usd: config.max_fdv_usd,
            max_price_impact_pct: config.max_price_impact_pct,
            impact_probe_sol: config.impact_probe_sol,
        }
    }
}

/// Counts for one Stage A sweep
#[derive(Debug, Default, Clone)]
pub struct DetectionReport {
    pub scanned: usize,
    pub too_young: usize,
    pub window_too_short: usize,
    pub below_thresholds: usize,
    pub cooled_down: usize,
    pub triggered: usize,
}

/// Counts for one Stage B sweep
#[derive(Debug, Default, Clone)]
pub struct DeliveryReport {
    pub scanned: usize,
    pub delivered: usize,
    pub skipped: Vec<(i64, SkipReason)>,
}

// ─── Stage A ────────────────────────────────────────────────────────────

pub struct SignalDetector {
    store: Arc<TokenStore>,
    params: IndicatorParams,
    thresholds: DetectionThresholds,
}

impl SignalDetector {
    pub fn new(store: Arc<TokenStore>, params: IndicatorParams, thresholds: DetectionThresholds) -> Self {
        Self { store, params, thresholds }
    }

    /// One detection sweep over all tracked tokens.
    ///
    /// Per-token failures are logged and the sweep continues.
    pub async fn run_sweep(&self, now: i64) -> PipelineResult<DetectionReport> {
        let mints = self.store.tracked_mints()?;
        let mut report = DetectionReport::default();

        for mint in mints {
            report.scanned += 1;
            match self.evaluate_token(&mint, now) {
                Ok(outcome) => match outcome {
                    TokenOutcome::TooYoung => report.too_young += 1,
                    TokenOutcome::WindowTooShort => report.window_too_short += 1,
                    TokenOutcome::BelowThresholds => report.below_thresholds += 1,
                    TokenOutcome::CooledDown => report.cooled_down += 1,
                    TokenOutcome::Triggered => report.triggered += 1,
                },
                Err(e) => {
                    log::warn!("⚠️  Detection failed for {}: {}", mint, e);
                }
            }
        }

        Ok(report)
    }

    fn evaluate_token(&self, mint: &str, now: i64) -> PipelineResult<TokenOutcome> {
        let Some(pool) = self.store.get_pool(mint)? else {
            // tracked_mints comes from pools, so this only races a
            // retention delete
            return Ok(TokenOutcome::TooYoung);
        };

        if now - pool.first_seen_ts < self.thresholds.min_pool_age_secs {
            return Ok(TokenOutcome::TooYoung);
        }

        let candles = self.store.recent_candles(mint, self.params.min_window)?;
        let Some(snapshot) = indicators::compute(&candles, &self.params) else {
            return Ok(TokenOutcome::WindowTooShort);
        };

        let triggered = snapshot.bullish_cross
            && snapshot.volume_spike >= self.thresholds.vol_spike_min
            && snapshot.rsi < self.thresholds.rsi_max;

        if !triggered {
            return Ok(TokenOutcome::BelowThresholds);
        }

        // A token that signaled recently is not re-signaled: the cascade
        // promises a notified-once signal, not one per sweep the pattern
        // persists
        if self
            .store
            .recent_signal_exists(mint, now - self.thresholds.signal_cooldown_secs)?
        {
            return Ok(TokenOutcome::CooledDown);
        }

        let id = self.store.insert_signal(
            mint,
            now,
            snapshot.bullish_cross,
            snapshot.volume_spike,
            snapshot.rsi,
        )?;
        log::info!(
            "🚨 Signal #{} {}: spike {:.2}x, RSI {:.1}",
            id,
            mint,
            snapshot.volume_spike,
            snapshot.rsi
        );

        Ok(TokenOutcome::Triggered)
    }
}

enum TokenOutcome {
    TooYoung,
    WindowTooShort,
    BelowThresholds,
    CooledDown,
    Triggered,
}

// ─── Stage B ────────────────────────────────────────────────────────────

pub struct SignalNotifier {
    store: Arc<TokenStore>,
    quotes: Arc<dyn QuoteProvider>,
    notifier: Arc<dyn Notifier>,
    gates: DeliveryGates,
}

impl SignalNotifier {
    pub fn new(
        store: Arc<TokenStore>,
        quotes: Arc<dyn QuoteProvider>,
        notifier: Arc<dyn Notifier>,
        gates: DeliveryGates,
    ) -> Self {
        Self { store, quotes, notifier, gates }
    }

    /// One delivery sweep over unnotified signals, oldest first.
    ///
    /// Rejected signals are left unnotified (NOT deleted) and retried next
    /// cycle; retention eventually ages them out.
    pub async fn run_sweep(&self, now: i64) -> PipelineResult<DeliveryReport> {
        eprintln!("DBG run_sweep: before unnotified_signals");
        let pending = self.store.unnotified_signals()?;
        eprintln!("DBG run_sweep: got {} pending", pending.len());
        let mut report = DeliveryReport::default();

        for signal in pending {
            report.scanned += 1;
            eprintln!("DBG run_sweep: calling try_deliver for #{}", signal.id);
            match self.try_deliver(&signal, now).await {
                Ok(None) => report.delivered += 1,
                Ok(Some(reason)) => {
                    log::debug!("⏭️  Signal #{} ({}) held: {}", signal.id, signal.mint, reason);
                    report.skipped.push((signal.id, reason));
                }
                Err(e) => {
                    log::warn!("⚠️  Delivery check failed for signal #{}: {}", signal.id, e);
                }
            }
        }

        Ok(report)
    }

    /// Returns `Ok(None)` on delivery, `Ok(Some(reason))` when the signal
    /// is held for a later cycle.
    async fn try_deliver(&self, signal: &BuySignal, now: i64) -> PipelineResult<Option<SkipReason>> {
        eprintln!("DBG try_deliver: before get_pool");
        let Some(pool) = self.store.get_pool(&signal.mint)? else {
            return Ok(Some(SkipReason::PoolMissing));
        };
        eprintln!("DBG try_deliver: got pool");

        // Liquidity minimum needs evidence: an unknown liquidity is
        // treated as too low, not waved through
        match pool.liq_usd {
            Some(liq) if liq >= self.gates.min_liquidity_usd => {}
            _ => return Ok(Some(SkipReason::LowLiquidity)),
        }

        // Valuation cap only rejects when the valuation is known to exceed
        if let Some(fdv) = pool.fdv_usd {
            if fdv > self.gates.max_fdv_usd {
                return Ok(Some(SkipReason::ExcessiveValuation));
            }
        }

        eprintln!("DBG try_deliver: before price_impact");
        let impact = match quotes::price_impact(
            self.quotes.as_ref(),
            &signal.mint,
            self.gates.impact_probe_sol,
        )
        .await
        {
            Ok(impact) => impact,
            Err(PipelineError::DataUnavailable(_)) | Err(PipelineError::Transient(_)) => {
                return Ok(Some(SkipReason::QuoteUnavailable));
            }
            Err(PipelineError::QuotaExceeded(_)) => {
                return Ok(Some(SkipReason::QuotaExhausted));
            }
            Err(e) => return Err(e),
        };

        if impact > self.gates.max_price_impact_pct {
            return Ok(Some(SkipReason::PriceImpactTooHigh));
        }

        eprintln!("DBG try_deliver: impact ok, before usd_price");
        // Best-effort current price for the message body
        let price_line = match quotes::usd_price(self.quotes.as_ref(), &signal.mint).await {
            Ok(price) => format!("\nPrice: ${:.6}", price),
            Err(_) => String::new(),
        };

        let text = format!(
            "🟢 *BUY SIGNAL* `{}`\nEMA9 crossed above EMA21\nVolume spike: {:.1}x\nRSI: {:.1}\nLiquidity: ${:.0}\nImpact ({} SOL): {:.2}%{}",
            signal.mint,
            signal.vol_spike,
            signal.rsi,
            pool.liq_usd.unwrap_or(0.0),
            self.gates.impact_probe_sol,
            impact,
            price_line
        );

        if let Err(e) = self.notifier.send(&text).await {
            log::warn!("⚠️  Notification failed for signal #{}: {}", signal.id, e);
            return Ok(Some(SkipReason::DeliveryFailed));
        }

        // The flip is exactly-once from this pipeline's perspective. If it
        // fails after a successful send, next cycle may deliver a
        // duplicate - accepted, not patched over with extra dedup state.
        let flipped = self.store.mark_notified(signal.id)?;
        if !flipped {
            log::warn!("⚠️  Signal #{} was already notified, duplicate delivery", signal.id);
        }
        if let Err(e) = self.store.record_notification(signal.id, &signal.mint, now, true) {
            log::warn!("⚠️  Notification log write failed for #{}: {}", signal.id, e);
        }

        log::info!("📨 Delivered signal #{} for {}", signal.id, signal.mint);
        Ok(None)
    }
}

// ─── Periodic tasks ─────────────────────────────────────────────────────

/// Stage A loop. A failed sweep raises an operational alert through the
/// sink and the next tick proceeds.
pub async fn detector_task(
    detector: Arc<SignalDetector>,
    alerts: Arc<dyn Notifier>,
    period_secs: u64,
) {
    log::info!("⏰ Starting signal detector (period: {}s)", period_secs);
    let mut timer = interval(Duration::from_secs(period_secs));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();

        match detector.run_sweep(now).await {
            Ok(report) => {
                log::info!(
                    "🔍 Detection sweep: {} scanned, {} triggered ({} young, {} short, {} cooled)",
                    report.scanned,
                    report.triggered,
                    report.too_young,
                    report.window_too_short,
                    report.cooled_down
                );
            }
            Err(e) => {
                log::error!("❌ Detection sweep failed: {}", e);
                let _ = alerts.send(&format!("⚠️ detection sweep failed: {}", e)).await;
            }
        }
    }
}

/// Stage B loop, same failure policy as Stage A
pub async fn notifier_task(
    notifier: Arc<SignalNotifier>,
    alerts: Arc<dyn Notifier>,
    period_secs: u64,
) {
    log::info!("⏰ Starting signal notifier (period: {}s)", period_secs);
    let mut timer = interval(Duration::from_secs(period_secs));

    loop {
        timer.tick().await;
        let now = chrono::Utc::now().timestamp();

        match notifier.run_sweep(now).await {
            Ok(report) => {
                if report.scanned > 0 {
                    log::info!(
                        "📬 Delivery sweep: {} pending, {} delivered, {} held",
                        report.scanned,
                        report.delivered,
                        report.skipped.len()
                    );
                }
            }
            Err(e) => {
                log::error!("❌ Delivery sweep failed: {}", e);
                let _ = alerts.send(&format!("⚠️ delivery sweep failed: {}", e)).await;
            }
        }
    }
}
